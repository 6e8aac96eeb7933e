mod app;
mod application;
mod domain;
mod extractor;
mod progress;
mod ui;
mod utils;

use extractor::ToolConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> iced::Result {
    dotenvy::dotenv().ok();
    let (config, config_error) = match ToolConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (ToolConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("Ignoring invalid configuration, using defaults: {}", e);
    }
    info!(
        extractor = %config.extractor_path.display(),
        poll_interval_ms = config.poll_interval_ms,
        "Starting Simple Video Downloader"
    );

    iced::application(
        move || app::DownloadApp::new(config.clone()),
        app::update,
        app::view,
    )
    .title("Simple Video Downloader")
    .run()
}
