//! Runtime error types.
//!
//! Component errors are folded into four caller-facing classes: bad input,
//! storage faults, broken chains and policy denials. Callers branch on the
//! class, not on which component raised it.

use thiserror::Error;
use warden_abuse::{AbuseError, Detection};
use warden_audit::AuditError;
use warden_config::ConfigError;
use warden_reputation::ReputationError;
use warden_storage::StorageError;
use warden_telemetry::TelemetryError;

/// Errors returned by [`Warden`](crate::Warden).
#[derive(Debug, Error)]
pub enum WardenError {
    /// Malformed caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A store could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A retention purge deleted only part of its target prefix.
    #[error("purge incomplete: {succeeded} of {attempted} records deleted")]
    PurgeIncomplete {
        /// Records targeted.
        attempted: u64,
        /// Records actually deleted.
        succeeded: u64,
    },

    /// The audit chain failed verification.
    #[error("integrity violation at seq {seq}: {reason}")]
    Integrity {
        /// First failing sequence number.
        seq: u64,
        /// What failed.
        reason: String,
    },

    /// The attempt was denied. This is an outcome, not a fault.
    #[error("attempt rejected: {reason}")]
    PolicyRejection {
        /// Why the attempt was denied.
        reason: String,
        /// Scoring outcome, when the denial came from scoring rather than an
        /// existing block.
        detection: Option<Box<Detection>>,
    },

    /// The actor may not perform the operation.
    #[error("{actor} is not authorized to {operation}")]
    Unauthorized {
        /// Actor that attempted the operation.
        actor: String,
        /// What was attempted.
        operation: String,
    },

    /// Configuration could not be loaded or applied.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WardenError {
    /// Whether this is a policy denial rather than a fault.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::PolicyRejection { .. })
    }

    /// Whether this is a storage fault.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::PurgeIncomplete { .. })
    }

    /// Scoring outcome behind a policy rejection, if any.
    #[must_use]
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::PolicyRejection { detection, .. } => detection.as_deref(),
            _ => None,
        }
    }
}

impl From<AbuseError> for WardenError {
    fn from(err: AbuseError) -> Self {
        match err {
            AbuseError::Validation(msg) => Self::Validation(msg),
            AbuseError::Rejected(detection) => Self::PolicyRejection {
                reason: format!(
                    "{} (score {}, severity {})",
                    detection.decision(),
                    detection.score(),
                    detection.severity()
                ),
                detection: Some(detection),
            },
            AbuseError::Reputation(e) => e.into(),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<AuditError> for WardenError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::IntegrityViolation { seq, reason } => Self::Integrity { seq, reason },
            AuditError::PurgeIncomplete {
                attempted,
                succeeded,
            } => Self::PurgeIncomplete {
                attempted,
                succeeded,
            },
            AuditError::Unauthorized { actor, operation } => {
                Self::Unauthorized { actor, operation }
            },
            AuditError::InvalidRequest(msg) => Self::Validation(msg),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<ReputationError> for WardenError {
    fn from(err: ReputationError) -> Self {
        match err {
            ReputationError::ZeroTtl => Self::Validation(err.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<StorageError> for WardenError {
    fn from(err: StorageError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<ConfigError> for WardenError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<TelemetryError> for WardenError {
    fn from(err: TelemetryError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for runtime operations.
pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_errors_classified() {
        let err: WardenError = AuditError::IntegrityViolation {
            seq: 7,
            reason: "chain hash mismatch".into(),
        }
        .into();
        assert!(matches!(err, WardenError::Integrity { seq: 7, .. }));

        let err: WardenError = AuditError::PurgeIncomplete {
            attempted: 5,
            succeeded: 3,
        }
        .into();
        assert!(err.is_persistence());
        assert_eq!(err.to_string(), "purge incomplete: 3 of 5 records deleted");

        let err: WardenError = AuditError::StorageError("disk gone".into()).into();
        assert!(err.is_persistence());
        assert!(!err.is_policy_rejection());
    }

    #[test]
    fn test_reputation_errors_classified() {
        let err: WardenError = ReputationError::ZeroTtl.into();
        assert!(matches!(err, WardenError::Validation(_)));

        let err: WardenError = ReputationError::Backend("refused".into()).into();
        assert!(err.is_persistence());
    }

    #[test]
    fn test_abuse_validation_maps_to_validation() {
        let err: WardenError = AbuseError::Validation("bad ip".into()).into();
        assert!(matches!(err, WardenError::Validation(_)));
        assert!(err.detection().is_none());
    }
}
