//! Error types shared across rowpipe crates

use thiserror::Error;

/// Result type alias for rowpipe operations
pub type Result<T> = std::result::Result<T, RowpipeError>;

/// Main error type for rowpipe
#[derive(Error, Debug)]
pub enum RowpipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Batch serialization failed: {0}")]
    Serialization(serde_json::Error),

    #[error("Malformed batch message: {0}")]
    Deserialization(serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
