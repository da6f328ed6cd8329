//! Warden Storage - namespaced key-value persistence.
//!
//! The ledger, the reputation backend and the fingerprint corpus all sit on
//! the same [`KvStore`] contract:
//!
//! - **In-memory** ([`MemoryKvStore`], always available): tests and
//!   single-process deployments that accept loss on restart
//! - **`SurrealKV`** ([`SurrealKvStore`], behind the `kv` feature): embedded,
//!   ACID, persistent
//!
//! Keys within a namespace are listed in ascending byte order by every
//! implementation, which the ledger relies on for sequence-ordered scans.
//!
//! # Feature Flags
//!
//! - **`kv`** — `SurrealKV` durable store

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{KvStore, MemoryKvStore, ScopedKvStore};

#[cfg(feature = "kv")]
pub use kv::SurrealKvStore;
