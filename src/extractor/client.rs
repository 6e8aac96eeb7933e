use std::ffi::OsString;
use std::process::Stdio;

use thiserror::Error;
use tracing::{debug, warn};

use super::models::{ToolConfig, VideoMetadata};
use crate::domain::DownloadRequest;
use crate::utils::tool_command;

#[derive(Error, Debug, Clone)]
pub enum MetadataError {
    #[error("Failed to run the extractor: {0}")]
    Spawn(String),

    #[error("{}", .0.join(", "))]
    Extraction(Vec<String>),

    #[error("Invalid extractor response: {0}")]
    Parse(String),
}

impl MetadataError {
    /// Human readable lines for the status bar.
    pub fn messages(&self) -> Vec<String> {
        match self {
            MetadataError::Extraction(lines) => lines.clone(),
            other => vec![other.to_string()],
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Runs the extraction tool. Holds no process state of its own.
#[derive(Debug, Clone)]
pub struct ExtractorClient {
    config: ToolConfig,
}

impl ExtractorClient {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Metadata only, nothing is downloaded.
    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        debug!(url, "Fetching metadata");
        let output = tool_command(&self.config.extractor_path)
            .arg("-J")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MetadataError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let lines = diagnostic_lines(&String::from_utf8_lossy(&output.stderr));
            warn!(url, ?lines, "Metadata fetch failed");
            return Err(MetadataError::Extraction(lines));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| MetadataError::Parse(e.to_string()))
    }

    /// Arguments for a download into `request`'s destination.
    pub fn download_args(&self, request: &DownloadRequest) -> Vec<OsString> {
        let format_selector = if request.format_selector.trim().is_empty() {
            self.config.default_format.clone()
        } else {
            request.format_selector.trim().to_string()
        };

        let mut args: Vec<OsString> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            "-f".into(),
            format_selector.into(),
            "--merge-output-format".into(),
            request.container().into(),
        ];
        if let Some(location) = self.config.media_tool_location() {
            args.push("--ffmpeg-location".into());
            args.push(location.into_os_string());
        }
        args.push("-o".into());
        args.push(request.output_template().into_os_string());
        args.push(request.source_url.trim().into());
        args
    }

    pub fn download_command(&self, request: &DownloadRequest) -> tokio::process::Command {
        let mut command = tool_command(&self.config.extractor_path);
        command
            .env("PYTHONIOENCODING", "UTF-8")
            .args(self.download_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

fn diagnostic_lines(stderr: &str) -> Vec<String> {
    let lines: Vec<String> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if lines.is_empty() {
        vec!["Unknown error".to_string()]
    } else {
        lines
    }
}
