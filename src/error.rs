use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Size not specified for file: {key}")]
    MissingSizeSpec { key: String },

    #[error("Invalid size token '{token}': {reason}")]
    InvalidSizeToken { token: String, reason: String },

    #[error("Key '{key}' is not under source folder '{folder}' or its size spec precedes it")]
    SourceFolderMismatch { key: String, folder: String },

    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Failed to encode transformed image: {0}")]
    Encode(String),

    #[error("Canvas {width}x{height} exceeds the allocation budget of {budget} bytes")]
    CanvasTooLarge { width: u32, height: u32, budget: u64 },

    #[error("Failed to fetch {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Manifest row {row} could not be decoded: {reason}")]
    ManifestDecode { row: usize, reason: String },

    #[error("Manifest encoding error: {0}")]
    ManifestEncode(String),

    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
