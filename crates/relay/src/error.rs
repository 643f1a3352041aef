//! Error types for relay engine operations

use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur during relay engine operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid fragmentation configuration: {0}")]
    InvalidConfiguration(String),

    #[error("fragmentation failed: {0}")]
    Fragmentation(String),

    #[error("reassembly failed: {0}")]
    Reassembly(String),

    #[error("transport send failed: {0}")]
    TransportSend(String),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("queue full: maximum {0} entries")]
    QueueFull(usize),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::SerializationError(err.to_string())
    }
}
