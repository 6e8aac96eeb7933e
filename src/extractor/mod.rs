pub mod client;
pub mod models;

pub use client::{ExtractorClient, MetadataError};
pub use models::{FormatRecord, ToolConfig, VideoMetadata};
