use iced::{
    widget::{button, column, pick_list, progress_bar, row, text, text_input, Space},
    Element, Length,
};

use std::path::PathBuf;

use crate::domain::{FormatChoice, ProgressPhase, ProgressSample};

/// Main view state
pub struct DownloadView {
    pub video_url: String,
    pub status_message: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub formats: Vec<FormatChoice>,
    pub selected_format: Option<FormatChoice>,
    pub progress: ProgressSample,
    /// Last successfully saved file
    pub saved_path: Option<PathBuf>,
    pub is_fetching: bool,
    pub is_downloading: bool,
}

impl Default for DownloadView {
    fn default() -> Self {
        Self {
            video_url: String::new(),
            status_message: "Paste a video link and fetch its formats".to_string(),
            title: None,
            thumbnail: None,
            formats: Vec::new(),
            selected_format: None,
            progress: ProgressSample::default(),
            saved_path: None,
            is_fetching: false,
            is_downloading: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DownloadMessage {
    UrlChanged(String),
    FetchPressed,
    FormatSelected(FormatChoice),
    DownloadPressed,
    RevealPressed,
}

impl DownloadView {
    pub fn is_busy(&self) -> bool {
        self.is_fetching || self.is_downloading
    }

    pub fn update(&mut self, message: DownloadMessage) {
        match message {
            DownloadMessage::UrlChanged(url) => {
                self.video_url = url;
            }
            DownloadMessage::FormatSelected(choice) => {
                self.selected_format = Some(choice);
            }
            DownloadMessage::FetchPressed
            | DownloadMessage::DownloadPressed
            | DownloadMessage::RevealPressed => {
                // Will be handled by the app
            }
        }
    }

    /// Status line text for a progress sample received mid-download.
    pub fn progress_status(sample: &ProgressSample) -> String {
        match sample.phase {
            ProgressPhase::Indeterminate => "Starting download...".to_string(),
            ProgressPhase::Measuring => "Getting file size...".to_string(),
            ProgressPhase::Downloading => format!("Downloading... {:.1}%", sample.percent),
            ProgressPhase::Complete => "Download complete!".to_string(),
            ProgressPhase::Failed => "Download failed.".to_string(),
        }
    }

    pub fn view(&self) -> Element<'_, DownloadMessage> {
        let fetch_label = if self.is_fetching {
            "Fetching..."
        } else {
            "Fetch Metadata"
        };
        let download_label = if self.is_downloading {
            "Downloading..."
        } else {
            "Download"
        };

        let details = column![
            text(self.title.as_deref().unwrap_or("No video loaded")).size(18),
            text(self.thumbnail.as_deref().unwrap_or_default()).size(12),
        ]
        .spacing(4);

        column![
            text("Video Downloader").size(32),
            Space::new().height(Length::Fixed(20.0)),
            text("Video link:").size(16),
            row![
                text_input("https://...", &self.video_url)
                    .on_input(DownloadMessage::UrlChanged)
                    .padding(10),
                button(fetch_label)
                    .on_press_maybe((!self.is_busy()).then_some(DownloadMessage::FetchPressed))
                    .padding([10, 20]),
            ]
            .spacing(10),
            details,
            text("Quality:").size(16),
            pick_list(
                self.formats.as_slice(),
                self.selected_format.as_ref(),
                DownloadMessage::FormatSelected,
            )
            .placeholder("Best available")
            .width(Length::Fill),
            Space::new().height(Length::Fixed(10.0)),
            progress_bar(0.0..=100.0, self.progress.percent as f32),
            text(&self.status_message).size(14),
            Space::new().height(Length::Fixed(20.0)),
            row![
                button(download_label)
                    .on_press_maybe((!self.is_busy()).then_some(DownloadMessage::DownloadPressed))
                    .padding([10, 20]),
                button("Open Folder")
                    .on_press_maybe(
                        (!self.is_busy() && self.saved_path.is_some())
                            .then_some(DownloadMessage::RevealPressed)
                    )
                    .padding([10, 20]),
            ]
            .spacing(10),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}
