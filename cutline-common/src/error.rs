//! Common error types for Cutline

use thiserror::Error;

/// Common result type for Cutline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Cutline services
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Project/timeline JSON could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
