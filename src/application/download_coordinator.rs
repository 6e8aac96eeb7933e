use std::path::PathBuf;

use futures::{stream::BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::info;

use super::supervisor::{DownloadEvent, DownloadSupervisor};
use crate::{
    domain::{AppError, DownloadOutcome, DownloadRequest},
    extractor::{ExtractorClient, VideoMetadata},
};

#[derive(Clone)]
pub struct DownloadCoordinator {
    client: ExtractorClient,
}

impl DownloadCoordinator {
    pub fn new(client: ExtractorClient) -> Self {
        Self { client }
    }

    pub async fn fetch_metadata(&self, video_url: String) -> Result<VideoMetadata, AppError> {
        let video_url = video_url.trim().to_string();
        if video_url.is_empty() {
            return Err(AppError::InvalidInput);
        }

        let metadata = self
            .client
            .fetch_metadata(&video_url)
            .await
            .map_err(|e| AppError::Metadata(e.messages()))?;

        info!(
            title = metadata.display_title(),
            formats = metadata.formats.len(),
            "Fetched video metadata"
        );
        Ok(metadata)
    }

    pub async fn choose_save_path(&self, suggested_filename: String) -> Option<PathBuf> {
        rfd::AsyncFileDialog::new()
            .set_title("Save Video As")
            .add_filter("MP4 file", &["mp4"])
            .add_filter("All files", &["*"])
            .set_file_name(&suggested_filename)
            .save_file()
            .await
            .map(|handle| handle.path().to_path_buf())
    }

    /// Events of one download, ending with exactly one `Finished`.
    ///
    /// Dropping the stream before it finishes cancels the download.
    pub fn download_stream(&self, request: DownloadRequest) -> BoxStream<'static, DownloadEvent> {
        futures::stream::unfold(
            DownloadRuntimeState::Start {
                supervisor: DownloadSupervisor::new(self.client.clone()),
                request,
            },
            |state| async move {
                match state {
                    DownloadRuntimeState::Start {
                        supervisor,
                        request,
                    } => {
                        let (events_tx, events) = mpsc::unbounded_channel();
                        match supervisor.start(request, events_tx) {
                            Ok(handle) => {
                                let cancel_guard = handle.cancel_on_drop();
                                next_event(events, cancel_guard).await
                            }
                            Err(e) => Some((
                                DownloadEvent::Finished(DownloadOutcome::failed(e)),
                                DownloadRuntimeState::Finished,
                            )),
                        }
                    }
                    DownloadRuntimeState::Downloading {
                        events,
                        cancel_guard,
                    } => next_event(events, cancel_guard).await,
                    DownloadRuntimeState::Finished => None,
                }
            },
        )
        .boxed()
    }
}

async fn next_event(
    mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    cancel_guard: DropGuard,
) -> Option<(DownloadEvent, DownloadRuntimeState)> {
    match events.recv().await {
        Some(DownloadEvent::Finished(outcome)) => {
            // Already finished, nothing left to cancel.
            let _ = cancel_guard.disarm();
            Some((DownloadEvent::Finished(outcome), DownloadRuntimeState::Finished))
        }
        Some(event) => Some((
            event,
            DownloadRuntimeState::Downloading {
                events,
                cancel_guard,
            },
        )),
        None => None,
    }
}

enum DownloadRuntimeState {
    Start {
        supervisor: DownloadSupervisor,
        request: DownloadRequest,
    },
    Downloading {
        events: mpsc::UnboundedReceiver<DownloadEvent>,
        cancel_guard: DropGuard,
    },
    Finished,
}
