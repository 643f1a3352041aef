//! Error types for offline nonce bundle operations

use thiserror::Error;

/// Result type for nonce cache operations
pub type NonceCacheResult<T> = Result<T, NonceCacheError>;

/// Errors that can occur while preparing or consuming offline nonce bundles
#[derive(Error, Debug)]
pub enum NonceCacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no offline bundle has been prepared")]
    NoBundle,

    #[error("no unused nonce available")]
    NonceUnavailable,

    #[error("nonce {0} already consumed")]
    AlreadyUsed(String),

    #[error("nonce account {account} is not authorized for {expected}")]
    AuthorityMismatch { account: String, expected: String },

    #[error("invalid nonce account: {0}")]
    InvalidAccount(String),

    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for NonceCacheError {
    fn from(err: serde_json::Error) -> Self {
        NonceCacheError::SerializationError(err.to_string())
    }
}

impl From<relay::RelayError> for NonceCacheError {
    fn from(err: relay::RelayError) -> Self {
        NonceCacheError::Storage(err.to_string())
    }
}
