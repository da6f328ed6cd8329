//! Warden Test - Shared test utilities for the Warden crates.
//!
//! This crate provides mock implementations and fixtures that can be used
//! across the Warden crates as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! warden-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! #[cfg(test)]
//! mod tests {
//!     use std::sync::Arc;
//!     use warden_test::{RecordingAlertDispatcher, fixtures};
//!
//!     #[tokio::test]
//!     async fn test_escalation_pages() {
//!         let alerts = Arc::new(RecordingAlertDispatcher::new());
//!         // ... build a warden with `.alerts(alerts.clone())` ...
//!         assert_eq!(alerts.count(), 1);
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use mocks::*;
