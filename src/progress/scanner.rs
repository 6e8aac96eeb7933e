use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use super::estimator::ExpectedSize;
use super::size::parse_size;

// Matches e.g. "[download]  23.1% of ~ 48.88MiB at 1.18MiB/s ETA 00:41".
// Groups: percentage, number, unit.
static SIZE_ANNOUNCEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?%\s+)?\bof\s+~?\s*(\d+(?:\.\d+)?)\s?([KMGT]i?B|B)?\b")
        .expect("size announcement pattern is valid")
});

/// Extract the announced total size from one line of extractor output.
///
/// This is the only place that knows what the extractor's progress lines look
/// like. A bare number only counts right after a percentage, so titles such
/// as "Part 1 of 3" never announce a size. Lines naming an output file are
/// skipped entirely. A zero parse counts as no announcement.
pub fn find_size_announcement(line: &str) -> Option<u64> {
    if find_output_path(line).is_some() {
        return None;
    }

    SIZE_ANNOUNCEMENT
        .captures_iter(line)
        .filter(|caps| caps.get(1).is_some() || caps.get(3).is_some())
        .map(|caps| {
            let unit = caps.get(3).map_or("", |unit| unit.as_str());
            parse_size(&format!("{}{unit}", &caps[2]))
        })
        .find(|bytes| *bytes > 0)
}

/// Output path the extractor says it is writing, if the line names one.
///
/// Understands destination, merge and already-downloaded lines; the last one
/// seen during a download is the merged file.
pub fn find_output_path(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    let path = if let Some(rest) = line.strip_prefix("[download] Destination:") {
        rest
    } else if let Some(rest) = line.strip_prefix("[Merger] Merging formats into") {
        rest
    } else {
        line.strip_prefix("[download]")?
            .strip_suffix("has already been downloaded")?
    };

    let path = path.trim().trim_matches('"');
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Feeds extractor output lines into the shared [`ExpectedSize`].
///
/// Cheap to clone; both output drains share one scanner so whichever stream
/// carries the first announcement wins.
#[derive(Debug, Clone)]
pub struct OutputScanner {
    expected: ExpectedSize,
}

impl OutputScanner {
    pub fn new(expected: ExpectedSize) -> Self {
        Self { expected }
    }

    /// Returns the byte count only for the line that set the expected size.
    pub fn scan_line(&self, line: &str) -> Option<u64> {
        if self.expected.is_known() {
            return None;
        }

        let bytes = find_size_announcement(line)?;
        if !self.expected.set_once(bytes) {
            return None;
        }

        info!(bytes, "Extractor announced download size");
        Some(bytes)
    }

    pub fn expected_size(&self) -> &ExpectedSize {
        &self.expected
    }
}
