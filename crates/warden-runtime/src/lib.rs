//! Warden Runtime - wiring and caller contract.
//!
//! This crate assembles the ledger writer, chain verifier, retention purger,
//! IP reputation store and abuse engine from a [`Config`](warden_config::Config)
//! and exposes them as one [`Warden`] handle:
//!
//! - [`Warden::gate_attempt`] rejects blocked IPs, then scores and enforces
//! - [`Warden::record_usage`] adds an allowed attempt to the match corpus
//! - [`Warden::record_event`] appends to the audit ledger without failing
//! - [`Warden::verify_chain`] and [`Warden::purge`] maintain the ledger
//! - [`Warden::block_permanent`] and [`Warden::unblock`] for operators
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_abuse::{EventType, FingerprintInput};
//! use warden_config::Config;
//! use warden_runtime::Warden;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let warden = Warden::from_config(&Config::default()).await?;
//!
//! let input = FingerprintInput::new("203.0.113.7")
//!     .device_id("dev-42")
//!     .email("new.user@example.edu");
//! match warden.gate_attempt(&input, EventType::TrialUsage).await {
//!     Ok(outcome) => {
//!         // ... start the trial ...
//!         warden.record_usage("user-42", &outcome).await?;
//!     },
//!     Err(e) if e.is_policy_rejection() => {
//!         // refuse the trial
//!     },
//!     Err(e) => return Err(e.into()),
//! }
//!
//! warden.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
pub mod prelude;

mod error;
mod warden;

pub use error::{WardenError, WardenResult};
pub use warden::{GateOutcome, RetentionReport, Warden, WardenBuilder};

/// Install the global subscriber described by `[logging]`.
///
/// # Errors
///
/// Returns [`WardenError::Config`] for an invalid logging section or if a
/// subscriber is already installed.
pub fn init_logging(cfg: &warden_config::Config) -> WardenResult<()> {
    warden_telemetry::setup_logging(&config_bridge::to_log_config(cfg)?)?;
    Ok(())
}
