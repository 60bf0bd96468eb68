//! Error types for sink and spill operations

use std::fmt;

/// Result type alias for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug)]
pub enum SinkError {
    /// The output cannot be reached right now
    Unavailable(String),

    /// Sample encoding or decoding failed
    SerializationError(String),

    /// I/O error (file access, etc.)
    IoError(std::io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Unavailable(msg) => write!(f, "sink unavailable: {}", msg),
            SinkError::SerializationError(msg) => write!(f, "sample serialization error: {}", msg),
            SinkError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::IoError(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::SerializationError(err.to_string())
    }
}
