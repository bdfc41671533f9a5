//! Error types for turnstream-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Object or session not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Blob store failure (I/O, HTTP, permissions)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A pipeline stage failed
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// Stage name
        stage: String,
        /// Failure text
        message: String,
    },

    /// Internal error (closed channels, poisoned state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the object simply does not exist yet
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
