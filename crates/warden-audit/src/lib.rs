//! Warden Audit - hash-chained, tamper-evident audit ledger.
//!
//! This crate provides:
//! - [`AuditRecord`]s linked by chain hash to their predecessor
//! - The [`LedgerStore`] persistence contract (compare-and-append), with
//!   in-memory and [`KvStore`](warden_storage::KvStore)-backed implementations
//! - A single-consumer [`LedgerWriter`] and its durable variant
//!   [`SpooledLedgerWriter`], both behind the [`AuditSink`] trait
//! - [`ChainVerifier`] for tamper detection with integrity alerting
//! - [`RetentionPurger`] for privileged, verify-before-delete purges
//!
//! # Security Model
//!
//! Every record's chain hash covers all of its fields plus the chain hash
//! of its predecessor. Changing, removing or reordering any persisted
//! record breaks the chain at that record, which verification reports.
//! Ordering comes from the append sequence only, never from timestamps.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_audit::{ActionKind, ChainVerifier, LedgerWriter, MaintenanceLock,
//!     MemoryLedgerStore, NewAuditRecord};
//! use warden_core::{Actor, ActorRole, TracingAlertDispatcher};
//! use warden_crypto::DigestAlgorithm;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemoryLedgerStore::new());
//! let digest = DigestAlgorithm::Sha256.digester();
//! let writer = LedgerWriter::spawn(store.clone(), digest.clone(), 1024);
//!
//! let admin = Actor::new("ops-1", ActorRole::PlatformAdmin);
//! writer.append(NewAuditRecord::new(admin, ActionKind::BackupRun));
//! writer.flush().await.unwrap();
//!
//! let verifier = ChainVerifier::new(
//!     store,
//!     digest,
//!     Arc::new(TracingAlertDispatcher),
//!     MaintenanceLock::new(),
//! );
//! assert!(verifier.verify_chain(1000).await.unwrap().valid);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod kv_store;
mod record;
mod retention;
mod spool;
mod store;
mod verify;
mod writer;

pub use error::{AuditError, AuditResult};
pub use kv_store::KvLedgerStore;
pub use record::{ActionKind, AuditRecord, ChainHead, NewAuditRecord};
pub use retention::{PurgeReport, RetentionPurger};
pub use spool::SpooledLedgerWriter;
pub use store::{LedgerStore, MemoryLedgerStore, PurgeOutcome};
pub use verify::{
    BreakKind, ChainBreak, ChainVerification, ChainVerifier, DEFAULT_BATCH_SIZE, MaintenanceLock,
};
pub use writer::{AuditSink, LedgerWriter, WriterStats};
