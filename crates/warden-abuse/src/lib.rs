//! Warden Abuse - fingerprint-based abuse scoring and enforcement.
//!
//! This crate provides:
//! - [`Fingerprint`]s: hashed signals of a signup or invite attempt
//! - The [`FingerprintStore`] match corpus, in memory or on a
//!   [`KvStore`](warden_storage::KvStore)
//! - A tunable [`ScoringPolicy`] mapping matches to a score, a severity and
//!   a [`Decision`]
//! - [`AbuseEngine`], which scores an attempt and enforces the decision
//!   (IP block, alert, audit record) before returning it
//!
//! Only allowed attempts enter the corpus. Rejected attempts are audited
//! but never become comparison points for later scoring.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_abuse::{AbuseEngine, EventType, Fingerprint, FingerprintInput,
//!     MemoryFingerprintStore, ScoringPolicy};
//! use warden_audit::{LedgerWriter, MemoryLedgerStore};
//! use warden_core::TracingAlertDispatcher;
//! use warden_crypto::{DigestAlgorithm, FingerprintHasher};
//! use warden_reputation::{IpReputationStore, MemoryReputationBackend};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ledger = Arc::new(LedgerWriter::spawn(
//!     Arc::new(MemoryLedgerStore::new()),
//!     DigestAlgorithm::Sha256.digester(),
//!     1024,
//! ));
//! let reputation = IpReputationStore::new(
//!     Arc::new(MemoryReputationBackend::new()),
//!     Duration::from_secs(3600),
//! );
//! let engine = AbuseEngine::new(
//!     Arc::new(MemoryFingerprintStore::new()),
//!     reputation,
//!     ledger,
//!     Arc::new(TracingAlertDispatcher),
//!     ScoringPolicy::default(),
//! );
//!
//! let hasher = FingerprintHasher::with_pepper(b"secret");
//! let input = FingerprintInput::new("192.0.2.10").device_id("device-abc");
//! let fp = Fingerprint::from_input(&input, EventType::TrialUsage, &hasher).unwrap();
//!
//! let detection = engine.detect(&fp).await.unwrap();
//! assert!(detection.allowed);
//! engine.log_usage("user-1", &fp, &detection).await.unwrap();
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod engine;
mod error;
mod fingerprint;
mod policy;
mod store;

pub use engine::{AbuseEngine, Detection};
pub use error::{AbuseError, AbuseResult};
pub use fingerprint::{EventType, Fingerprint, FingerprintInput, FingerprintRecord};
pub use policy::{
    Decision, ScoreResult, ScoringPolicy, SeverityThresholds, SignalMatches, SignalWeights,
};
pub use store::{FingerprintStore, KvFingerprintStore, MemoryFingerprintStore};
