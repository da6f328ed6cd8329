//! Abuse-scoring error types.

use thiserror::Error;

use crate::engine::Detection;

/// Errors from fingerprinting and scoring.
#[derive(Debug, Error)]
pub enum AbuseError {
    /// Fingerprint input was malformed or empty.
    #[error("invalid fingerprint input: {0}")]
    Validation(String),

    /// The attempt was scored as abusive. This is an expected outcome, not a
    /// fault, and callers must refuse the action that was being gated.
    #[error("attempt rejected: {} (score {})", .0.result.decision, .0.result.score)]
    Rejected(Box<Detection>),

    /// The fingerprint corpus could not be read or written.
    #[error("fingerprint storage error: {0}")]
    Storage(String),

    /// A stored fingerprint could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The reputation store failed.
    #[error(transparent)]
    Reputation(#[from] warden_reputation::ReputationError),
}

impl From<warden_storage::StorageError> for AbuseError {
    fn from(err: warden_storage::StorageError) -> Self {
        match err {
            warden_storage::StorageError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl AbuseError {
    /// Whether this is a policy rejection rather than a fault.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The detection behind a rejection.
    #[must_use]
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Rejected(d) => Some(d),
            _ => None,
        }
    }
}

/// Result type for abuse operations.
pub type AbuseResult<T> = Result<T, AbuseError>;
