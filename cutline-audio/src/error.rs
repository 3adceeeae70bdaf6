//! Error types for cutline-audio
//!
//! Module-specific error types using thiserror. None of these reach the
//! scheduling loop as failures: load errors are recorded per asset and
//! retried, and only output-device errors propagate to callers of
//! `init_audio_output`.

use thiserror::Error;

/// Main error type for the audio engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Asset could not be fetched from its source
    #[error("Asset source error: {0}")]
    AssetSource(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared timeline/config layer
    #[error(transparent)]
    Common(#[from] cutline_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using cutline-audio Error
pub type Result<T> = std::result::Result<T, Error>;
