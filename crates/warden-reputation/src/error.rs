//! Reputation error types.

use thiserror::Error;

/// Errors from the reputation store and its backends.
#[derive(Debug, Error)]
pub enum ReputationError {
    /// The backend could not be reached or failed the operation.
    #[error("reputation backend error: {0}")]
    Backend(String),

    /// A stored entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A temporary block was requested with a zero TTL.
    #[error("temporary block TTL must be non-zero")]
    ZeroTtl,
}

impl From<warden_storage::StorageError> for ReputationError {
    fn from(err: warden_storage::StorageError) -> Self {
        match err {
            warden_storage::StorageError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ReputationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for reputation operations.
pub type ReputationResult<T> = Result<T, ReputationError>;
