use crate::application::{DownloadCoordinator, DownloadEvent};
use crate::domain::{AppError, DownloadRequest, ProgressSample};
use crate::extractor::{ExtractorClient, ToolConfig, VideoMetadata};
use crate::ui::{DownloadMessage, DownloadView};
use crate::utils::reveal_in_file_manager;
use futures::StreamExt;
use iced::Task;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct DownloadApp {
    view: DownloadView,
    coordinator: DownloadCoordinator,
    suggested_filename: String,
}

impl Default for DownloadApp {
    fn default() -> Self {
        Self::new(ToolConfig::default())
    }
}

impl DownloadApp {
    pub fn new(config: ToolConfig) -> Self {
        let coordinator = DownloadCoordinator::new(ExtractorClient::new(config));

        Self {
            view: DownloadView::default(),
            coordinator,
            suggested_filename: "video.mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    UiMessage(DownloadMessage),
    MetadataFetched(Result<VideoMetadata, AppError>),
    SavePathSelected(Option<PathBuf>),
    /// Progress samples followed by exactly one outcome
    Download(DownloadEvent),
    Revealed(Result<(), String>),
}

pub fn update(app: &mut DownloadApp, message: Message) -> Task<Message> {
    match message {
        Message::UiMessage(ui_msg) => {
            app.view.update(ui_msg.clone());

            match ui_msg {
                DownloadMessage::FetchPressed if !app.view.is_busy() => {
                    if app.view.video_url.trim().is_empty() {
                        app.view.status_message = AppError::InvalidInput.to_string();
                        return Task::none();
                    }

                    app.view.is_fetching = true;
                    app.view.formats.clear();
                    app.view.selected_format = None;
                    app.view.title = None;
                    app.view.thumbnail = None;
                    app.view.progress = ProgressSample::default();
                    app.view.status_message = "Fetching video metadata...".to_string();

                    let coordinator = app.coordinator.clone();
                    let url = app.view.video_url.clone();
                    return Task::perform(
                        async move { coordinator.fetch_metadata(url).await },
                        Message::MetadataFetched,
                    );
                }
                DownloadMessage::DownloadPressed if !app.view.is_busy() => {
                    if app.view.video_url.trim().is_empty() {
                        app.view.status_message = AppError::InvalidInput.to_string();
                        return Task::none();
                    }

                    app.view.status_message = "Please select save location...".to_string();
                    let coordinator = app.coordinator.clone();
                    let suggested_filename = app.suggested_filename.clone();
                    return Task::perform(
                        async move { coordinator.choose_save_path(suggested_filename).await },
                        Message::SavePathSelected,
                    );
                }
                DownloadMessage::RevealPressed if !app.view.is_busy() => {
                    if let Some(path) = app.view.saved_path.clone() {
                        return reveal(path);
                    }
                }
                _ => {}
            }
        }
        Message::MetadataFetched(result) => {
            app.view.is_fetching = false;
            match result {
                Ok(metadata) => {
                    app.suggested_filename = metadata.suggested_file_name();
                    app.view.formats = metadata.format_choices();
                    app.view.selected_format = app.view.formats.first().cloned();
                    app.view.title = Some(metadata.display_title().to_string());
                    app.view.thumbnail = metadata.thumbnail;
                    app.view.status_message = format!(
                        "Found {} video formats",
                        app.view.formats.len()
                    );
                }
                Err(e) => {
                    app.view.status_message = e.to_string();
                }
            }
        }
        Message::SavePathSelected(path_opt) => match path_opt {
            Some(path) => {
                let format_selector = app
                    .view
                    .selected_format
                    .as_ref()
                    .map(|choice| choice.value.clone())
                    .unwrap_or_default();
                let request = DownloadRequest::for_save_path(
                    app.view.video_url.trim().to_string(),
                    format_selector,
                    &path,
                );
                info!(path = %path.display(), format = %request.format_selector, "Download requested");

                app.view.is_downloading = true;
                app.view.progress = ProgressSample::default();
                app.view.status_message = DownloadView::progress_status(&app.view.progress);

                // Runs on iced's tokio executor; dropping it cancels the download
                return Task::stream(
                    app.coordinator
                        .download_stream(request)
                        .map(Message::Download),
                );
            }
            None => {
                // User cancelled dialog
                app.view.status_message = "Download cancelled".to_string();
            }
        },
        Message::Download(DownloadEvent::Progress(sample)) => {
            app.view.progress = sample;
            app.view.status_message = DownloadView::progress_status(&sample);
        }
        Message::Download(DownloadEvent::Finished(outcome)) => {
            app.view.is_downloading = false;
            match (outcome.final_path, outcome.error) {
                (Some(path), None) => {
                    app.view.progress = ProgressSample::complete();
                    app.view.status_message = format!("Saved: {}", path.display());
                    app.view.saved_path = Some(path.clone());
                    return reveal(path);
                }
                (_, error) => {
                    app.view.progress = ProgressSample::failed(app.view.progress.percent);
                    app.view.status_message = match error {
                        Some(e) => format!("Download failed: {}", AppError::from(e)),
                        None => "Download failed".to_string(),
                    };
                }
            }
        }
        Message::Revealed(Err(e)) => {
            warn!("Could not open the file manager: {}", e);
        }
        Message::Revealed(Ok(())) => {}
    }
    Task::none()
}

/// Best effort; a missing file manager only gets logged.
fn reveal(path: PathBuf) -> Task<Message> {
    Task::perform(
        async move {
            reveal_in_file_manager(&path)
                .await
                .map_err(|e| format!("{}: {e}", path.display()))
        },
        Message::Revealed,
    )
}

pub fn view(app: &DownloadApp) -> iced::Element<'_, Message> {
    app.view.view().map(Message::UiMessage)
}
