//! Warden Reputation - tiered IP block list.
//!
//! This crate provides:
//! - The [`ReputationBackend`] capability (`set_with_ttl`, `get`, `delete`)
//! - [`MemoryReputationBackend`]: concurrent map plus a periodic sweeper
//! - [`KvReputationBackend`]: durable, per-key expiry over a `KvStore`
//! - [`IpReputationStore`]: temporary and permanent blocks, permanent first
//!
//! The backend is chosen once at startup and injected; nothing here probes
//! the environment.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_reputation::{IpReputationStore, MemoryReputationBackend};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = IpReputationStore::new(
//!     Arc::new(MemoryReputationBackend::new()),
//!     Duration::from_secs(3600),
//! );
//! let ip = "203.0.113.9".parse().unwrap();
//! store.block_temporary(ip, "abuse score 72", None).await.unwrap();
//! assert!(store.is_blocked(ip).await.unwrap().blocked);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod backend;
mod error;
mod store;

pub use backend::{KvReputationBackend, MemoryReputationBackend, ReputationBackend};
pub use error::{ReputationError, ReputationResult};
pub use store::{BlockEntry, BlockStatus, BlockTier, IpReputationStore};
