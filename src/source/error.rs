//! Error type for source polls

use std::fmt;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying on the next tick
    Transient,
    /// Retrying will not help; the source is disabled
    Permanent,
}

#[derive(Debug)]
pub struct AdapterError {
    kind: ErrorKind,
    message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Transient => write!(f, "source poll failed: {}", self.message),
            ErrorKind::Permanent => write!(f, "source poll failed permanently: {}", self.message),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            AdapterError::permanent(err.to_string())
        } else {
            AdapterError::transient(err.to_string())
        }
    }
}
