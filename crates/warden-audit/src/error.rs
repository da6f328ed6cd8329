//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur in the audit ledger.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Compare-and-append rejected the record: the head moved underneath it.
    #[error("append conflict: expected seq {expected_seq}, record has seq {found_seq}")]
    Conflict {
        /// Sequence number the store would have accepted.
        expected_seq: u64,
        /// Sequence number carried by the rejected record.
        found_seq: u64,
    },

    /// Chain integrity violation.
    #[error("chain integrity violation at seq {seq}: {reason}")]
    IntegrityViolation {
        /// First sequence number that failed verification.
        seq: u64,
        /// Why the chain is invalid.
        reason: String,
    },

    /// A retention purge deleted some but not all of its target records.
    #[error("retention purge incomplete: {succeeded} of {attempted} records deleted")]
    PurgeIncomplete {
        /// Records the purge tried to delete.
        attempted: u64,
        /// Records actually deleted.
        succeeded: u64,
    },

    /// The actor lacks the role required for an administrative operation.
    #[error("actor {actor} is not authorized to {operation}")]
    Unauthorized {
        /// The rejected actor.
        actor: String,
        /// What was attempted.
        operation: String,
    },

    /// A request argument was out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The writer has been shut down.
    #[error("ledger writer is closed")]
    WriterClosed,

    /// Crypto error.
    #[error("crypto error: {0}")]
    CryptoError(#[from] warden_crypto::CryptoError),
}

impl From<warden_storage::StorageError> for AuditError {
    fn from(err: warden_storage::StorageError) -> Self {
        match err {
            warden_storage::StorageError::Serialization(msg) => Self::SerializationError(msg),
            other => Self::StorageError(other.to_string()),
        }
    }
}

impl AuditError {
    /// Whether this error indicates the backend could not be reached or
    /// could not complete a write.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::StorageError(_) | Self::SerializationError(_) | Self::PurgeIncomplete { .. }
        )
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
