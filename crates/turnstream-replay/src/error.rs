//! Error types for turnstream-replay

use thiserror::Error;

/// Replay error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure (connect, read, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected HTTP status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Trace object does not exist (yet)
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed response body
    #[error("parse error: {0}")]
    Parse(String),

    /// No direct link could be obtained for a session's trace
    #[error("no direct trace URL for session {0}")]
    DirectUrlUnavailable(String),

    /// Error from the core crate
    #[error(transparent)]
    Core(#[from] turnstream_core::Error),
}

impl Error {
    /// Whether this just means "nothing flushed yet"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Core(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
