use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::FormatChoice;
use crate::utils::sanitize_filename;

/// `-J` output of the extractor; only the fields the UI needs.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatRecord {
    pub format_id: String,
    pub format_note: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
}

impl FormatRecord {
    /// Audio-only streams report their video codec as `"none"`.
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    pub fn resolution(&self) -> String {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                format!("{width}x{height}")
            }
            _ => "unknown".to_string(),
        }
    }

    /// Video stream merged with the best audio track.
    pub fn to_choice(&self) -> FormatChoice {
        FormatChoice {
            value: format!("{}+bestaudio", self.format_id),
            label: format!(
                "{} ({}, {}, {}) + bestaudio",
                self.format_id,
                self.format_note.as_deref().unwrap_or_default(),
                self.ext.as_deref().unwrap_or_default(),
                self.resolution()
            ),
        }
    }
}

impl VideoMetadata {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or("video")
    }

    pub fn format_choices(&self) -> Vec<FormatChoice> {
        self.formats
            .iter()
            .filter(|format| format.has_video())
            .map(FormatRecord::to_choice)
            .collect()
    }

    pub fn suggested_file_name(&self) -> String {
        format!(
            "{}.mp4",
            sanitize_filename(self.display_title()).trim_matches(|c| c == '.' || c == ' ')
        )
    }
}

/// Configuration for the external tools
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub extractor_path: PathBuf,
    pub media_tool_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub default_format: String,
    pub log_level: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            extractor_path: PathBuf::from("yt-dlp"),
            media_tool_path: None,
            poll_interval_ms: 500,
            default_format: "bestvideo+bestaudio/best".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ToolConfig {
    /// Defaults, then `video-downloader.toml`, then `VIDEO_DOWNLOADER_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("video-downloader").required(false))
            .add_source(Environment::with_prefix("VIDEO_DOWNLOADER").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Configured media tool, or whatever `ffmpeg` is on `PATH`.
    pub fn media_tool_location(&self) -> Option<PathBuf> {
        self.media_tool_path
            .clone()
            .or_else(|| which::which("ffmpeg").ok())
    }
}
