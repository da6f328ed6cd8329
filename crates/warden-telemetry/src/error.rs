//! Errors raised while installing the log subscriber.

use std::path::PathBuf;

use thiserror::Error;

/// Why logging could not be set up.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `logging.format` names no known format.
    #[error("unknown log format '{0}'")]
    UnknownFormat(String),

    /// The level or a per-crate directive does not parse as a filter.
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter {
        /// Offending level or directive.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// The rolling-file target directory could not be created.
    #[error("cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Requested directory.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed in this process.
    #[error("log subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Result type for logging setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
