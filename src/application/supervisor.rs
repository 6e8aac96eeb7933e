use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

use crate::{
    domain::{DownloadError, DownloadOutcome, DownloadRequest, ProgressSample, SupervisorState},
    extractor::ExtractorClient,
    progress::{
        scanner::find_output_path, ExpectedSize, OutputScanner, ProgressEstimator,
    },
    utils::read_lossy_line,
};

/// How long the output drains may keep going after the extractor exited.
/// A helper process that inherited a pipe can otherwise hold it open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(10);
const MAX_ERROR_LINES: usize = 5;

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress(ProgressSample),
    Finished(DownloadOutcome),
}

/// Receives everything a running download reports.
///
/// `on_outcome` is called exactly once per started download and nothing is
/// reported after it.
pub trait DownloadObserver: Send + Sync + 'static {
    fn on_progress(&self, sample: ProgressSample);

    fn on_outcome(&self, outcome: DownloadOutcome);
}

impl DownloadObserver for mpsc::UnboundedSender<DownloadEvent> {
    fn on_progress(&self, sample: ProgressSample) {
        let _ = self.send(DownloadEvent::Progress(sample));
    }

    fn on_outcome(&self, outcome: DownloadOutcome) {
        let _ = self.send(DownloadEvent::Finished(outcome));
    }
}

/// Runs one extractor process to completion.
pub struct DownloadSupervisor {
    client: ExtractorClient,
    state: watch::Sender<SupervisorState>,
}

impl DownloadSupervisor {
    pub fn new(client: ExtractorClient) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self { client, state }
    }

    /// Validate the request and spawn the extractor.
    ///
    /// Invalid requests and spawn failures are returned here and nothing is
    /// reported to the observer. Otherwise the download continues in the
    /// background and the observer gets exactly one outcome. Must be called
    /// from inside a tokio runtime.
    pub fn start<O: DownloadObserver>(
        self,
        request: DownloadRequest,
        observer: O,
    ) -> Result<DownloadHandle, DownloadError> {
        advance(&self.state, SupervisorState::Launching);

        if let Err(err) = validate_request(&request) {
            warn!(%err, "Rejected download request");
            advance(&self.state, SupervisorState::Failed);
            return Err(err);
        }

        let mut child = match self.client.download_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    extractor = %self.client.config().extractor_path.display(),
                    "Failed to spawn extractor: {}", e
                );
                advance(&self.state, SupervisorState::Failed);
                return Err(DownloadError::ProcessSpawn(e.to_string()));
            }
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            advance(&self.state, SupervisorState::Failed);
            return Err(DownloadError::ProcessSpawn(
                "extractor output could not be captured".to_string(),
            ));
        };

        info!(pid = child.id(), url = %request.source_url, "Extractor started");
        advance(&self.state, SupervisorState::Running);

        let cancel = CancellationToken::new();
        let state = self.state.subscribe();
        let execution = Execution {
            poll_interval: self.client.config().poll_interval(),
            request,
            cancel: cancel.clone(),
            state: self.state,
        };

        Ok(DownloadHandle {
            task: launch(execution, child, stdout, stderr, observer),
            cancel,
            state,
        })
    }
}

/// Handle on a download started by [`DownloadSupervisor::start`].
pub struct DownloadHandle {
    task: JoinHandle<DownloadOutcome>,
    cancel: CancellationToken,
    state: watch::Receiver<SupervisorState>,
}

impl DownloadHandle {
    /// Kill the extractor; the download finishes with [`DownloadError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the download when the returned guard is dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub async fn wait(self) -> DownloadOutcome {
        self.task
            .await
            .unwrap_or_else(|e| DownloadOutcome::failed(DownloadError::Internal(e.to_string())))
    }
}

fn advance(state: &watch::Sender<SupervisorState>, next: SupervisorState) {
    state.send_if_modified(|current| {
        if !current.can_advance_to(next) {
            warn!(from = ?*current, to = ?next, "Ignoring invalid state transition");
            return false;
        }
        debug!(from = ?*current, to = ?next, "Download state changed");
        *current = next;
        true
    });
}

fn validate_request(request: &DownloadRequest) -> Result<(), DownloadError> {
    let invalid = |reason: String| Err(DownloadError::InvalidRequest(reason));

    let url = request.source_url.trim();
    if url.is_empty() {
        return invalid("the video link is empty".to_string());
    }
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => return invalid(format!("unsupported link scheme `{}`", parsed.scheme())),
        Err(e) => return invalid(format!("`{url}` is not a valid link: {e}")),
    }

    let file_name = request.destination_file_name.trim();
    if file_name.is_empty() || file_name.contains(['/', '\\']) {
        return invalid(format!("`{file_name}` is not a valid file name"));
    }

    let directory = &request.destination_directory;
    match std::fs::metadata(directory) {
        Ok(metadata) if !metadata.is_dir() => {
            return invalid(format!("{} is not a directory", directory.display()));
        }
        Ok(_) => {}
        Err(e) => return invalid(format!("{}: {e}", directory.display())),
    }

    // Permission bits say nothing about ownership or ACLs, so try a real write.
    match tempfile::Builder::new()
        .prefix(".video-downloader-")
        .tempfile_in(directory)
    {
        Ok(_) => Ok(()),
        Err(e) => invalid(format!("{} is not writable: {e}", directory.display())),
    }
}

struct Execution {
    request: DownloadRequest,
    poll_interval: Duration,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
}

/// Supervise `child` on a new task and report the single outcome.
fn launch<Out, Diag, O>(
    execution: Execution,
    child: Child,
    stdout: Out,
    stderr: Diag,
    observer: O,
) -> JoinHandle<DownloadOutcome>
where
    Out: AsyncRead + Unpin + Send + 'static,
    Diag: AsyncRead + Unpin + Send + 'static,
    O: DownloadObserver,
{
    let span = info_span!("download", file = %execution.request.destination_file_name);
    tokio::spawn(
        async move {
            let outcome = AssertUnwindSafe(execution.run(child, stdout, stderr, &observer))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(%message, "Download task panicked");
                    advance(&execution.state, SupervisorState::Finalizing);
                    advance(&execution.state, SupervisorState::Failed);
                    DownloadOutcome::failed(DownloadError::Internal(message))
                });

            observer.on_outcome(outcome.clone());
            outcome
        }
        .instrument(span),
    )
}

#[derive(Debug, Default)]
struct StdoutReport {
    output_path: Option<PathBuf>,
    last_line: Option<String>,
}

#[derive(Debug, Default)]
struct StderrReport {
    error_lines: Vec<String>,
    last_line: Option<String>,
}

impl StderrReport {
    fn summary(&self) -> Option<String> {
        if self.error_lines.is_empty() {
            self.last_line.clone()
        } else {
            Some(self.error_lines.join("; "))
        }
    }
}

type DrainResult<T> = Result<T, String>;

impl Execution {
    async fn run<Out, Diag, O>(
        &self,
        mut child: Child,
        stdout: Out,
        stderr: Diag,
        observer: &O,
    ) -> DownloadOutcome
    where
        Out: AsyncRead + Unpin + Send + 'static,
        Diag: AsyncRead + Unpin + Send + 'static,
        O: DownloadObserver,
    {
        let expected = ExpectedSize::new();
        let scanner = OutputScanner::new(expected.clone());
        let mut estimator = ProgressEstimator::with_expected_size(expected);

        let mut stdout_task = tokio::spawn(drain_stdout(stdout, scanner.clone()));
        let mut stderr_task = tokio::spawn(drain_stderr(stderr, scanner));
        let mut stdout_result: Option<DrainResult<StdoutReport>> = None;
        let mut stderr_result: Option<DrainResult<StderrReport>> = None;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fault: Option<String> = None;
        let mut cancelled = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = self.cancel.cancelled(), if !cancelled => {
                    info!("Cancelling download");
                    cancelled = true;
                    let _ = child.start_kill();
                }
                joined = &mut stdout_task, if stdout_result.is_none() => {
                    let result = flatten_join(joined, "stdout");
                    if let Err(message) = &result {
                        record_fault(&mut fault, message, &mut child);
                    }
                    stdout_result = Some(result);
                }
                joined = &mut stderr_task, if stderr_result.is_none() => {
                    let result = flatten_join(joined, "stderr");
                    if let Err(message) = &result {
                        record_fault(&mut fault, message, &mut child);
                    }
                    stderr_result = Some(result);
                }
                _ = ticker.tick() => {
                    match probe_download_size(&self.request).await {
                        Ok(size) => observer.on_progress(estimator.sample(size)),
                        Err(e) => warn!("Skipping progress sample: {}", DownloadError::UnexpectedIo(e.to_string())),
                    }
                }
            }
        };

        advance(&self.state, SupervisorState::Finalizing);

        let stdout_result = match stdout_result {
            Some(result) => result,
            None => finish_drain(stdout_task, "stdout").await,
        };
        let stderr_result = match stderr_result {
            Some(result) => result,
            None => finish_drain(stderr_task, "stderr").await,
        };
        if fault.is_none() {
            fault = stdout_result
                .as_ref()
                .err()
                .or(stderr_result.as_ref().err())
                .cloned();
        }
        let stdout_report = stdout_result.unwrap_or_default();
        let stderr_report = stderr_result.unwrap_or_default();

        let outcome = self
            .classify(status, fault, cancelled, &stdout_report, &stderr_report)
            .await;

        if outcome.success {
            observer.on_progress(estimator.complete());
            advance(&self.state, SupervisorState::Completed);
            info!(path = ?outcome.final_path, "Download completed");
        } else {
            advance(&self.state, SupervisorState::Failed);
            warn!(error = ?outcome.error_message(), "Download failed");
        }
        outcome
    }

    async fn classify(
        &self,
        status: io::Result<ExitStatus>,
        fault: Option<String>,
        cancelled: bool,
        stdout: &StdoutReport,
        stderr: &StderrReport,
    ) -> DownloadOutcome {
        if cancelled {
            return DownloadOutcome::failed(DownloadError::Cancelled);
        }
        if let Some(message) = fault {
            return DownloadOutcome::failed(DownloadError::Internal(message));
        }

        let status = match status {
            Ok(status) => status,
            Err(e) => return DownloadOutcome::failed(DownloadError::UnexpectedIo(e.to_string())),
        };
        info!(code = ?status.code(), "Extractor exited");

        if !status.success() {
            let message = stderr
                .summary()
                .or_else(|| stdout.last_line.clone())
                .unwrap_or_else(|| "the extractor did not report a reason".to_string());
            return DownloadOutcome::failed(DownloadError::ExtractionFailure {
                code: status.code(),
                message,
            });
        }

        let final_path = self.request.final_path();
        match tokio::fs::try_exists(&final_path).await {
            Ok(true) => DownloadOutcome::completed(final_path),
            Ok(false) => {
                if let Some(reported) = self.reported_output(stdout).await {
                    info!(
                        expected = %final_path.display(),
                        saved = %reported.display(),
                        "Extractor saved under a different extension"
                    );
                    return DownloadOutcome::completed(reported);
                }
                warn!(
                    expected = %final_path.display(),
                    reported = ?stdout.output_path,
                    "Extractor succeeded without producing the destination file"
                );
                DownloadOutcome::failed(DownloadError::LogicalDownloadFailure(final_path))
            }
            Err(e) => DownloadOutcome::failed(DownloadError::UnexpectedIo(e.to_string())),
        }
    }

    /// The last file the extractor named, when it is a finished sibling of the
    /// expected destination.
    ///
    /// A `best` fallback skips merging and keeps the source container, so the
    /// extension can differ from the requested one.
    async fn reported_output(&self, stdout: &StdoutReport) -> Option<PathBuf> {
        let path = stdout.output_path.as_ref()?;
        let in_destination = path.parent() == Some(self.request.destination_directory.as_path());
        let same_stem = path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy() == self.request.stem());
        if !(in_destination && same_stem) {
            return None;
        }

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Some(path.clone()),
            _ => None,
        }
    }
}

fn record_fault(fault: &mut Option<String>, message: &str, child: &mut Child) {
    error!(%message, "Output drain failed, stopping extractor");
    if fault.is_none() {
        *fault = Some(message.to_string());
    }
    let _ = child.start_kill();
}

fn flatten_join<T>(
    joined: Result<io::Result<T>, tokio::task::JoinError>,
    stream: &str,
) -> DrainResult<T> {
    match joined {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(format!("failed to read extractor {stream}: {e}")),
        Err(e) => Err(format!("extractor {stream} reader crashed: {e}")),
    }
}

async fn finish_drain<T: Default>(
    mut task: JoinHandle<io::Result<T>>,
    stream: &str,
) -> DrainResult<T> {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(joined) => flatten_join(joined, stream),
        Err(_) => {
            warn!(stream, "Extractor output still open after exit, giving up on it");
            task.abort();
            Ok(T::default())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn drain_stdout<R>(reader: R, scanner: OutputScanner) -> io::Result<StdoutReport>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut report = StdoutReport::default();

    while let Some(line) = read_lossy_line(&mut reader, &mut buffer).await? {
        // Some extractor builds print progress here instead of stderr.
        scanner.scan_line(&line);
        if let Some(path) = find_output_path(&line) {
            debug!(path = %path.display(), "Extractor reported output path");
            report.output_path = Some(path);
        }
        if !line.trim().is_empty() {
            report.last_line = Some(line.trim().to_string());
        }
    }
    Ok(report)
}

async fn drain_stderr<R>(reader: R, scanner: OutputScanner) -> io::Result<StderrReport>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut report = StderrReport::default();

    while let Some(line) = read_lossy_line(&mut reader, &mut buffer).await? {
        scanner.scan_line(&line);

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("ERROR") {
            if report.error_lines.len() == MAX_ERROR_LINES {
                report.error_lines.remove(0);
            }
            report.error_lines.push(trimmed.to_string());
        }
        report.last_line = Some(trimmed.to_string());
    }
    Ok(report)
}

/// Size of whatever the extractor is currently writing.
///
/// The partial file is checked first, then the final destination. Nothing on
/// disk yet counts as zero bytes.
async fn probe_download_size(request: &DownloadRequest) -> io::Result<u64> {
    let directory = &request.destination_directory;
    let stem = request.stem();

    for candidate in [
        directory.join(format!("{stem}.part")),
        directory.join(format!("{}.part", request.destination_file_name)),
    ] {
        if let Some(size) = file_size(&candidate).await? {
            return Ok(size);
        }
    }
    if let Some(size) = largest_partial_file(directory, &stem).await? {
        return Ok(size);
    }
    Ok(file_size(&request.final_path()).await?.unwrap_or(0))
}

async fn file_size(path: &Path) -> io::Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Per-format partial files look like `<stem>.f137.mp4.part`.
async fn largest_partial_file(directory: &Path, stem: &str) -> io::Result<Option<u64>> {
    let prefix = format!("{stem}.");
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut largest: Option<u64> = None;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(&prefix) && name.ends_with(".part")) {
            continue;
        }
        match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => {
                largest = largest.max(Some(metadata.len()));
            }
            Ok(_) => {}
            // Renamed away between listing and stat.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(largest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProgressPhase;
    use crate::extractor::ToolConfig;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Instant;
    use tokio::io::ReadBuf;
    use tokio::sync::mpsc::error::TryRecvError;

    #[cfg(unix)]
    const FIND_OUTPUT: &str = r#"
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
base="${out%'.%(ext)s'}"
"#;

    fn request(dir: &Path, url: &str) -> DownloadRequest {
        DownloadRequest {
            source_url: url.to_string(),
            format_selector: "137+bestaudio".to_string(),
            destination_directory: dir.to_path_buf(),
            destination_file_name: "clip.mp4".to_string(),
        }
    }

    fn supervisor(extractor: PathBuf) -> DownloadSupervisor {
        DownloadSupervisor::new(ExtractorClient::new(ToolConfig {
            extractor_path: extractor,
            media_tool_path: Some(PathBuf::from("ffmpeg")),
            poll_interval_ms: 20,
            ..ToolConfig::default()
        }))
    }

    #[cfg(unix)]
    fn fake_extractor(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{FIND_OUTPUT}\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    async fn collect(
        mut rx: mpsc::UnboundedReceiver<DownloadEvent>,
    ) -> (Vec<ProgressSample>, Vec<DownloadOutcome>) {
        let mut samples = Vec::new();
        let mut outcomes = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                DownloadEvent::Progress(sample) => {
                    assert!(outcomes.is_empty(), "progress reported after the outcome");
                    samples.push(sample);
                }
                DownloadEvent::Finished(outcome) => outcomes.push(outcome),
            }
        }
        (samples, outcomes)
    }

    fn execution(dir: &Path) -> Execution {
        Execution {
            request: request(dir, "https://example.com/v"),
            poll_interval: Duration::from_millis(20),
            cancel: CancellationToken::new(),
            state: watch::channel(SupervisorState::Running).0,
        }
    }

    fn sleeping_child() -> Child {
        tokio::process::Command::new("sleep")
            .arg("10")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("pipe exploded")))
        }
    }

    struct PanicsOnProgress {
        outcomes: Arc<Mutex<Vec<DownloadOutcome>>>,
    }

    impl DownloadObserver for PanicsOnProgress {
        fn on_progress(&self, _sample: ProgressSample) {
            panic!("observer exploded");
        }

        fn on_outcome(&self, outcome: DownloadOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp"))
            .start(request(dir.path(), "  "), tx);

        assert!(matches!(result, Err(DownloadError::InvalidRequest(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn test_invalid_destination_and_scheme_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp"))
            .start(request(&missing, "https://example.com/v"), tx);
        assert!(matches!(result, Err(DownloadError::InvalidRequest(_))));

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp"))
            .start(request(dir.path(), "ftp://example.com/v"), tx);
        assert!(matches!(result, Err(DownloadError::InvalidRequest(_))));

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bad_name = request(dir.path(), "https://example.com/v");
        bad_name.destination_file_name = "../clip.mp4".to_string();
        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp")).start(bad_name, tx);
        assert!(matches!(result, Err(DownloadError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_extractor_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp"))
            .start(request(dir.path(), "https://example.com/v"), tx);

        assert!(matches!(result, Err(DownloadError::ProcessSpawn(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        // The write check cleans up after itself.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_destination_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users write through permission bits.
        let writable = std::fs::File::create(locked.join("check")).is_ok();
        let _ = std::fs::remove_file(locked.join("check"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = supervisor(PathBuf::from("/nonexistent/yt-dlp"))
            .start(request(&locked, "https://example.com/v"), tx);
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        if writable {
            assert!(matches!(result, Err(DownloadError::ProcessSpawn(_))));
        } else {
            match result {
                Err(DownloadError::InvalidRequest(reason)) => {
                    assert!(reason.contains("not writable"))
                }
                other => panic!("unexpected result {:?}", other.err()),
            }
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_download() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
echo "[download] Destination: $base.f137.mp4"
echo "[download]   0.0% of 1.00KiB at 10.00KiB/s ETA 00:01" >&2
head -c 256 /dev/zero > "$base.f137.mp4.part"
sleep 0.2
head -c 768 /dev/zero > "$base.f137.mp4.part"
sleep 0.2
rm "$base.f137.mp4.part"
head -c 1024 /dev/zero > "$base.mp4"
echo "[Merger] Merging formats into \"$base.mp4\""
"#,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(handle.state(), SupervisorState::Completed);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].final_path, Some(dir.path().join("clip.mp4")));
        assert_eq!(handle.wait().await, outcomes[0]);

        assert_eq!(samples.last(), Some(&ProgressSample::complete()));
        assert!(samples
            .windows(2)
            .all(|pair| pair[0].percent <= pair[1].percent));
        assert!(samples
            .iter()
            .all(|sample| (0.0..=100.0).contains(&sample.percent)));
        assert!(samples
            .iter()
            .any(|sample| sample.phase == ProgressPhase::Downloading));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_without_size_stays_measuring() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
echo "[generic] Extracting URL"
echo "ERROR: [generic] Unable to download webpage" >&2
sleep 0.1
exit 1
"#,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(handle.state(), SupervisorState::Failed);
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        match &outcomes[0].error {
            Some(DownloadError::ExtractionFailure { code, message }) => {
                assert_eq!(*code, Some(1));
                assert!(message.contains("Unable to download webpage"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(samples
            .iter()
            .all(|sample| sample.phase == ProgressPhase::Measuring));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_exit_without_file_is_a_logical_failure() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(tools.path(), "echo done\nexit 0");
        let (tx, rx) = mpsc::unbounded_channel();

        supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].error,
            Some(DownloadError::LogicalDownloadFailure(dir.path().join("clip.mp4")))
        );
        assert!(samples
            .iter()
            .all(|sample| sample.phase != ProgressPhase::Complete));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_size_announcement_drives_percent() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
echo "[download]   0.0% of 10MB" >&2
sleep 0.1
echo "[download]   1.0% of 20MB" >&2
head -c 5000000 /dev/zero > "$base.part"
sleep 0.3
exit 1
"#,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        let highest = samples.iter().map(|s| s.percent).fold(0.0, f64::max);
        assert_eq!(highest, 50.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_title_containing_of_does_not_fix_the_size() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
echo "[download] Destination: $base.f137.mp4"
sleep 0.1
echo "[download]   0.0% of 1000B at 10.00KiB/s ETA 00:01"
head -c 250 /dev/zero > "$base.f137.mp4.part"
sleep 0.3
exit 1
"#,
        );
        let mut req = request(dir.path(), "https://example.com/v");
        req.destination_file_name = "Part 1 of 3.mp4".to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        supervisor(extractor).start(req, tx).unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        let highest = samples.iter().map(|s| s.percent).fold(0.0, f64::max);
        assert_eq!(highest, 25.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unmerged_download_keeps_its_container() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
echo "[download] Destination: $base.webm"
echo "[download]   0.0% of 512B" >&2
head -c 512 /dev/zero > "$base.webm"
echo "[download] 100% of 512B"
"#,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(handle.state(), SupervisorState::Completed);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].final_path, Some(dir.path().join("clip.webm")));
        assert_eq!(samples.last(), Some(&ProgressSample::complete()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reported_file_elsewhere_is_not_accepted() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let stray = tools.path().join("clip.webm");
        std::fs::write(&stray, [0u8; 16]).unwrap();
        let extractor = fake_extractor(
            tools.path(),
            &format!("echo \"[download] Destination: {}\"", stray.display()),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        let (_, outcomes) = collect(rx).await;

        assert_eq!(
            outcomes[0].error,
            Some(DownloadError::LogicalDownloadFailure(dir.path().join("clip.mp4")))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_poll_errors_are_skipped() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("videos");
        std::fs::create_dir(&dir).unwrap();
        let extractor = fake_extractor(
            tools.path(),
            r#"
dir=$(dirname "$base")
echo "[download]   0.0% of 1000B" >&2
rm -rf "$dir"
touch "$dir"
sleep 0.3
rm -f "$dir"
mkdir "$dir"
head -c 500 /dev/zero > "$base.part"
sleep 0.3
exit 3
"#,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        supervisor(extractor)
            .start(request(&dir, "https://example.com/v"), tx)
            .unwrap();
        let (samples, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].error,
            Some(DownloadError::ExtractionFailure { code: Some(3), .. })
        ));
        assert!(samples
            .iter()
            .any(|sample| sample.phase == ProgressPhase::Downloading && sample.percent == 50.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_extractor() {
        let tools = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let extractor = fake_extractor(tools.path(), "exec sleep 10");
        let (tx, rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let handle = supervisor(extractor)
            .start(request(dir.path(), "https://example.com/v"), tx)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        let (_, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error, Some(DownloadError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_fault_yields_single_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let task = launch(
            execution(dir.path()),
            sleeping_child(),
            FailingReader,
            tokio::io::empty(),
            tx,
        );
        let (_, outcomes) = collect(rx).await;

        assert_eq!(outcomes.len(), 1);
        match &outcomes[0].error {
            Some(DownloadError::Internal(message)) => assert!(message.contains("stdout")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(task.await.unwrap(), outcomes[0]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_panic_inside_download_still_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let observer = PanicsOnProgress {
            outcomes: Arc::clone(&outcomes),
        };

        let outcome = launch(
            execution(dir.path()),
            sleeping_child(),
            tokio::io::empty(),
            tokio::io::empty(),
            observer,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.error,
            Some(DownloadError::Internal("observer exploded".to_string()))
        );
        assert_eq!(outcomes.lock().unwrap().as_slice(), &[outcome]);
    }

    #[tokio::test]
    async fn test_probe_prefers_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), "https://example.com/v");

        assert_eq!(probe_download_size(&req).await.unwrap(), 0);

        std::fs::write(dir.path().join("clip.mp4"), [0u8; 40]).unwrap();
        assert_eq!(probe_download_size(&req).await.unwrap(), 40);

        std::fs::write(dir.path().join("clip.f137.mp4.part"), [0u8; 10]).unwrap();
        std::fs::write(dir.path().join("clip.f140.m4a.part"), [0u8; 25]).unwrap();
        std::fs::write(dir.path().join("other.f1.mp4.part"), [0u8; 99]).unwrap();
        assert_eq!(probe_download_size(&req).await.unwrap(), 25);

        std::fs::write(dir.path().join("clip.part"), [0u8; 5]).unwrap();
        assert_eq!(probe_download_size(&req).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_download_size_reports_io_errors() {
        let root = tempfile::tempdir().unwrap();
        let not_a_dir = root.path().join("videos");
        std::fs::write(&not_a_dir, b"").unwrap();

        let req = request(&not_a_dir, "https://example.com/v");
        assert!(probe_download_size(&req).await.is_err());
    }
}
