use std::path::{Path, PathBuf};

use super::error::DownloadError;

/// Containers the media tool can merge into directly.
const SUPPORTED_CONTAINERS: [&str; 4] = ["mp4", "mkv", "webm", "mov"];
const DEFAULT_CONTAINER: &str = "mp4";

/// Everything the supervisor needs to run one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub format_selector: String,
    pub destination_directory: PathBuf,
    pub destination_file_name: String,
}

impl DownloadRequest {
    /// Builds a request from the path picked in the save dialog.
    pub fn for_save_path(source_url: String, format_selector: String, path: &Path) -> Self {
        let destination_directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let destination_file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            source_url,
            format_selector,
            destination_directory,
            destination_file_name,
        }
    }

    /// File name without its extension.
    pub fn stem(&self) -> String {
        Path::new(&self.destination_file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.destination_file_name.clone())
    }

    /// Container passed to `--merge-output-format`.
    pub fn container(&self) -> &'static str {
        let extension = Path::new(&self.destination_file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());

        extension
            .and_then(|ext| SUPPORTED_CONTAINERS.iter().find(|c| **c == ext).copied())
            .unwrap_or(DEFAULT_CONTAINER)
    }

    /// Where the merged file ends up once the extractor is done.
    pub fn final_path(&self) -> PathBuf {
        self.destination_directory
            .join(format!("{}.{}", self.stem(), self.container()))
    }

    /// Output template with the extractor's extension placeholder.
    pub fn output_template(&self) -> PathBuf {
        self.destination_directory
            .join(format!("{}.%(ext)s", self.stem()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressPhase {
    #[default]
    Indeterminate,
    Measuring,
    Downloading,
    Complete,
    Failed,
}

/// One progress reading. Published whole, so readers never see half an update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressSample {
    pub percent: f64,
    pub phase: ProgressPhase,
}

impl ProgressSample {
    pub fn measuring(percent: f64) -> Self {
        Self {
            percent,
            phase: ProgressPhase::Measuring,
        }
    }

    pub fn downloading(percent: f64) -> Self {
        Self {
            percent,
            phase: ProgressPhase::Downloading,
        }
    }

    pub fn complete() -> Self {
        Self {
            percent: 100.0,
            phase: ProgressPhase::Complete,
        }
    }

    pub fn failed(percent: f64) -> Self {
        Self {
            percent,
            phase: ProgressPhase::Failed,
        }
    }
}

/// Terminal result of a download. Exactly one is produced per started download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub final_path: Option<PathBuf>,
    pub error: Option<DownloadError>,
}

impl DownloadOutcome {
    pub fn completed(final_path: PathBuf) -> Self {
        Self {
            success: true,
            final_path: Some(final_path),
            error: None,
        }
    }

    pub fn failed(error: DownloadError) -> Self {
        Self {
            success: false,
            final_path: None,
            error: Some(error),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    Finalizing,
    Completed,
    Failed,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_advance_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;

        !self.is_terminal()
            && matches!(
                (self, next),
                (Idle, Launching)
                    | (Launching, Running)
                    | (Launching, Failed)
                    | (Running, Finalizing)
                    | (Finalizing, Completed)
                    | (Finalizing, Failed)
            )
    }
}

/// A selectable quality entry: what the user sees and what the extractor gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChoice {
    pub value: String,
    pub label: String,
}

impl std::fmt::Display for FormatChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}
