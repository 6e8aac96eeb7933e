pub mod download_coordinator;
pub mod supervisor;

pub use download_coordinator::DownloadCoordinator;
pub use supervisor::{DownloadEvent, DownloadHandle, DownloadObserver, DownloadSupervisor};
