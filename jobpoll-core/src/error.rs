//! Error types for the job poller

use thiserror::Error;

/// Core error type for the job poller
#[derive(Error, Debug)]
pub enum PollerError {
    /// Message body could not be decoded into a job invocation
    #[error("Decode error: {0}")]
    Decode(String),

    /// Remote queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration error (e.g. queue with no URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for PollerError {
    fn from(err: serde_json::Error) -> Self {
        PollerError::Decode(err.to_string())
    }
}

/// Result type alias for poller operations
pub type Result<T> = std::result::Result<T, PollerError>;
