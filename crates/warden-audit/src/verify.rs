//! Chain verification.
//!
//! Verification walks the ledger in ascending sequence order starting at
//! the anchor (genesis, or the last purged record) and recomputes every
//! chain hash from the record's stored fields and the *predecessor's stored*
//! chain hash. The first mismatch is reported; the records after it are
//! not inspected, since they would fail as a cascade.
//!
//! The verifier never repairs anything.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info};
use warden_core::{Actor, Alert, AlertDispatcher, Severity};
use warden_crypto::{ContentHash, Digest};

use crate::error::{AuditError, AuditResult};
use crate::record::{ActionKind, AuditRecord, ChainHead, NewAuditRecord};
use crate::store::LedgerStore;
use crate::writer::AuditSink;

/// Records fetched per `read_range` call.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Excludes retention purges from running alongside verification.
///
/// Verification holds it shared, purge holds it exclusively.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceLock(Arc<RwLock<()>>);

impl MaintenanceLock {
    /// Create a new, unlocked maintenance lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn verifying(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().await
    }

    pub(crate) async fn purging(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }
}

/// Why a record failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// The recomputed chain hash differs from the stored one.
    HashMismatch,
    /// The stored `previous_hash` differs from the predecessor's chain hash.
    PredecessorMismatch,
    /// A sequence number is missing.
    SequenceGap,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch => write!(f, "chain hash mismatch"),
            Self::PredecessorMismatch => write!(f, "previous hash does not match predecessor"),
            Self::SequenceGap => write!(f, "sequence gap"),
        }
    }
}

/// The first failing position in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    /// Sequence number that failed (for a gap, the missing one).
    pub seq: u64,
    /// What failed.
    pub kind: BreakKind,
}

/// Incremental checker shared by verification and retention purge.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainCursor {
    expected_seq: u64,
    predecessor: ContentHash,
}

impl ChainCursor {
    pub(crate) fn from_anchor(anchor: &ChainHead) -> Self {
        Self {
            expected_seq: anchor.next_seq(),
            predecessor: anchor.chain_hash,
        }
    }

    /// Check the next record and advance past it.
    pub(crate) fn check(&mut self, record: &AuditRecord, digest: &dyn Digest) -> Result<(), ChainBreak> {
        if record.seq != self.expected_seq {
            return Err(ChainBreak {
                seq: self.expected_seq,
                kind: BreakKind::SequenceGap,
            });
        }
        if record.compute_chain_hash(&self.predecessor, digest) != record.chain_hash {
            return Err(ChainBreak {
                seq: record.seq,
                kind: BreakKind::HashMismatch,
            });
        }
        if record.previous_hash != self.predecessor {
            return Err(ChainBreak {
                seq: record.seq,
                kind: BreakKind::PredecessorMismatch,
            });
        }
        self.expected_seq = record.seq.saturating_add(1);
        self.predecessor = record.chain_hash;
        Ok(())
    }

    /// Sequence number of the last record that passed.
    pub(crate) fn verified_through(&self) -> u64 {
        self.expected_seq.saturating_sub(1)
    }
}

/// Result of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainVerification {
    /// Whether every inspected record verified.
    pub valid: bool,
    /// First failing sequence number, if any.
    pub broken_at_seq: Option<u64>,
    /// What failed at `broken_at_seq`.
    pub break_kind: Option<BreakKind>,
    /// Records that passed.
    pub records_checked: u64,
    /// Sequence of the last record that passed (anchor seq if none).
    pub verified_through: u64,
}

impl ChainVerification {
    /// Turn a failed verification into [`AuditError::IntegrityViolation`].
    ///
    /// # Errors
    ///
    /// Returns the violation if the chain is broken.
    pub fn into_result(self) -> AuditResult<Self> {
        match (self.broken_at_seq, self.break_kind) {
            (Some(seq), Some(kind)) => Err(AuditError::IntegrityViolation {
                seq,
                reason: kind.to_string(),
            }),
            _ => Ok(self),
        }
    }
}

/// Read-only chain verifier with integrity alerting.
pub struct ChainVerifier {
    store: Arc<dyn LedgerStore>,
    digest: Arc<dyn Digest>,
    alerts: Arc<dyn AlertDispatcher>,
    sink: Option<Arc<dyn AuditSink>>,
    maintenance: MaintenanceLock,
    batch_size: usize,
}

impl fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainVerifier")
            .field("algorithm", &self.digest.algorithm())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ChainVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        digest: Arc<dyn Digest>,
        alerts: Arc<dyn AlertDispatcher>,
        maintenance: MaintenanceLock,
    ) -> Self {
        Self {
            store,
            digest,
            alerts,
            sink: None,
            maintenance,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Record detected breaks as `SecurityEvent` ledger entries.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the read batch size (clamped to at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Verify up to `limit` records from the anchor.
    ///
    /// A break is not an `Err`: it is reported in the result, alerted at
    /// [`Severity::Critical`], and recorded as a `SecurityEvent`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be read.
    pub async fn verify_chain(&self, limit: usize) -> AuditResult<ChainVerification> {
        let result = {
            let _guard = self.maintenance.verifying().await;
            self.scan(limit).await?
        };

        match result.broken_at_seq {
            Some(seq) => {
                let kind = result.break_kind.unwrap_or(BreakKind::HashMismatch);
                self.report_break(ChainBreak { seq, kind }).await;
            },
            None => info!(
                records = result.records_checked,
                through = result.verified_through,
                "audit chain verified"
            ),
        }
        Ok(result)
    }

    async fn scan(&self, limit: usize) -> AuditResult<ChainVerification> {
        let anchor = self.store.anchor().await?;
        let mut cursor = ChainCursor::from_anchor(&anchor);
        let mut since = anchor.seq;
        let mut checked: u64 = 0;
        let mut remaining = limit;

        while remaining > 0 {
            let batch = self
                .store
                .read_range(since, remaining.min(self.batch_size))
                .await?;
            if batch.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(batch.len());

            for record in &batch {
                if let Err(brk) = cursor.check(record, self.digest.as_ref()) {
                    return Ok(ChainVerification {
                        valid: false,
                        broken_at_seq: Some(brk.seq),
                        break_kind: Some(brk.kind),
                        records_checked: checked,
                        verified_through: cursor.verified_through(),
                    });
                }
                checked = checked.saturating_add(1);
                since = record.seq;
            }
        }

        Ok(ChainVerification {
            valid: true,
            broken_at_seq: None,
            break_kind: None,
            records_checked: checked,
            verified_through: cursor.verified_through(),
        })
    }

    /// Alert on and record a detected break.
    pub(crate) async fn report_break(&self, brk: ChainBreak) {
        error!(seq = brk.seq, kind = %brk.kind, "audit chain integrity violation");

        let alert = Alert::new(
            Severity::Critical,
            "Audit chain integrity violation",
            format!(
                "Ledger verification failed at seq {}: {}. Manual investigation required.",
                brk.seq, brk.kind
            ),
        )
        .with_meta("seq", brk.seq)
        .with_meta("kind", brk.kind);
        self.alerts.notify(alert).await;

        if let Some(sink) = &self.sink {
            sink.record(
                NewAuditRecord::new(Actor::system(), ActionKind::SecurityEvent)
                    .with_entity(format!("ledger:{}", brk.seq))
                    .with_detail(json!({
                        "event": "chain_integrity_violation",
                        "broken_at_seq": brk.seq,
                        "kind": brk.kind,
                    })),
            )
            .await;
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub(crate) fn digest(&self) -> &dyn Digest {
        self.digest.as_ref()
    }

    pub(crate) fn maintenance(&self) -> &MaintenanceLock {
        &self.maintenance
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use crate::writer::persist_one;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use warden_crypto::Sha256Digest;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Alert>>);

    #[async_trait]
    impl AlertDispatcher for Recorder {
        async fn notify(&self, alert: Alert) {
            self.0.lock().unwrap().push(alert);
        }
    }

    async fn filled(n: usize) -> Arc<MemoryLedgerStore> {
        let store = Arc::new(MemoryLedgerStore::new());
        for i in 0..n {
            persist_one(
                store.as_ref(),
                &Sha256Digest,
                NewAuditRecord::new(Actor::system(), ActionKind::DataMutation)
                    .with_detail(json!({ "i": i })),
            )
            .await
            .unwrap();
        }
        store
    }

    fn verifier(store: Arc<MemoryLedgerStore>, alerts: Arc<Recorder>) -> ChainVerifier {
        ChainVerifier::new(store, Arc::new(Sha256Digest), alerts, MaintenanceLock::new())
            .with_batch_size(3)
    }

    #[tokio::test]
    async fn test_valid_chain() {
        let alerts = Arc::new(Recorder::default());
        let v = verifier(filled(10).await, alerts.clone());
        let result = v.verify_chain(100).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 10);
        assert_eq!(result.verified_through, 10);
        assert!(alerts.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_bounds_the_pass() {
        let v = verifier(filled(10).await, Arc::new(Recorder::default()));
        let result = v.verify_chain(4).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 4);
    }

    #[tokio::test]
    async fn test_content_tamper_reports_first_break_only() {
        let store = filled(6).await;
        store
            .tamper(3, |r| r.detail = json!({ "i": 999 }))
            .await;
        let alerts = Arc::new(Recorder::default());
        let result = verifier(store, alerts.clone()).verify_chain(100).await.unwrap();

        assert!(!result.valid);
        assert_eq!(result.broken_at_seq, Some(3));
        assert_eq!(result.break_kind, Some(BreakKind::HashMismatch));
        assert_eq!(result.records_checked, 2);

        let alerts = alerts.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(matches!(
            result.into_result(),
            Err(AuditError::IntegrityViolation { seq: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_rehashed_record_breaks_at_successor() {
        // Recomputing the tampered record's own hash moves the break to its
        // successor, whose stored previous_hash no longer matches.
        let store = filled(5).await;
        store
            .tamper(2, |r| {
                r.detail = json!({ "i": -1 });
                r.chain_hash = r.compute_chain_hash(&r.previous_hash, &Sha256Digest);
            })
            .await;
        let result = verifier(store, Arc::new(Recorder::default()))
            .verify_chain(100)
            .await
            .unwrap();
        assert_eq!(result.broken_at_seq, Some(3));
    }

    #[tokio::test]
    async fn test_deleted_record_is_a_gap() {
        let store = filled(5).await;
        store.remove_raw(4).await;
        let result = verifier(store, Arc::new(Recorder::default()))
            .verify_chain(100)
            .await
            .unwrap();
        assert_eq!(result.broken_at_seq, Some(4));
        assert_eq!(result.break_kind, Some(BreakKind::SequenceGap));
    }
}
