//! Warden Core - shared vocabulary for the audit ledger and abuse gate.
//!
//! This crate provides:
//! - [`Severity`] tiers used by scoring and alerting
//! - Actor identity and roles ([`Actor`], [`ActorRole`])
//! - The [`AlertDispatcher`] seam for outbound notifications
//!
//! It has no dependencies on other internal warden crates.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod alert;
pub mod types;

pub use alert::{Alert, AlertDispatcher, TracingAlertDispatcher};
pub use types::{Actor, ActorRole, Severity};
