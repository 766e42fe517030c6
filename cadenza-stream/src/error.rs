//! Error types for cadenza-stream
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.

use thiserror::Error;

/// Main error type for the streaming service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/WebSocket server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sample rate conversion errors
    #[error("Resample error: {0}")]
    Resample(String),

    /// Opus encoder errors
    #[error("Encode error: {0}")]
    Encode(String),

    /// Playback state machine errors
    #[error("Playback error: {0}")]
    Playback(String),

    /// Media library errors
    #[error("Library error: {0}")]
    Library(String),

    /// Requested path is outside the media root
    #[error("Path outside media library: {0}")]
    PathOutsideRoot(String),

    /// Queue index out of range
    #[error("Index out of range: {0}")]
    IndexOutOfRange(usize),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience Result type using the service Error
pub type Result<T> = std::result::Result<T, Error>;
