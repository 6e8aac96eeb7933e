use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the download core.
///
/// `InvalidRequest` and `ProcessSpawn` are returned straight from
/// `DownloadSupervisor::start`; the rest only ever show up inside a
/// `DownloadOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("Invalid download request: {0}")]
    InvalidRequest(String),

    #[error("Failed to start the extractor: {0}")]
    ProcessSpawn(String),

    #[error("Extractor failed{}: {message}", .code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    ExtractionFailure { code: Option<i32>, message: String },

    #[error("Extractor reported success but {} was not created", .0.display())]
    LogicalDownloadFailure(PathBuf),

    #[error("I/O error: {0}")]
    UnexpectedIo(String),

    #[error("Download task failed: {0}")]
    Internal(String),

    #[error("Download cancelled")]
    Cancelled,
}

/// Errors shown on the status line of the UI.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Please enter a video link")]
    InvalidInput,

    #[error("Failed to fetch video metadata: {}", .0.join(", "))]
    Metadata(Vec<String>),

    #[error(transparent)]
    Download(#[from] DownloadError),
}
