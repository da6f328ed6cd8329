//! Privileged retention purge.
//!
//! A purge deletes the contiguous sequence prefix whose records are older
//! than the cutoff. Every targeted record is verified first, under the
//! exclusive maintenance lock, so a purge never runs alongside a
//! verification pass and never deletes a record the chain has not vouched
//! for. The last deleted record becomes the new anchor.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{info, warn};
use warden_core::Actor;

use crate::error::{AuditError, AuditResult};
use crate::record::{ActionKind, NewAuditRecord, now_millis};
use crate::verify::{ChainCursor, ChainVerifier};
use crate::writer::AuditSink;

/// What a retention purge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    /// Records older than this were eligible.
    pub cutoff: DateTime<Utc>,
    /// Records targeted.
    pub attempted: u64,
    /// Records deleted.
    pub purged: u64,
    /// Sequence of the last deleted record, if any.
    pub through_seq: Option<u64>,
}

/// Runs retention purges over the ledger.
pub struct RetentionPurger {
    verifier: Arc<ChainVerifier>,
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for RetentionPurger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionPurger").finish_non_exhaustive()
    }
}

impl RetentionPurger {
    /// Create a purger sharing the verifier's store, digest and lock.
    #[must_use]
    pub fn new(verifier: Arc<ChainVerifier>, sink: Arc<dyn AuditSink>) -> Self {
        Self { verifier, sink }
    }

    /// Purge ledger records older than `retention_days`.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Unauthorized`] unless `actor` is privileged
    /// - [`AuditError::InvalidRequest`] if `retention_days` is zero
    /// - [`AuditError::IntegrityViolation`] if the prefix fails verification
    ///   (nothing is deleted)
    /// - [`AuditError::PurgeIncomplete`] if only part of the prefix was deleted
    pub async fn purge(&self, retention_days: u32, actor: &Actor) -> AuditResult<PurgeReport> {
        if !actor.is_privileged() {
            warn!(%actor, "unprivileged retention purge rejected");
            return Err(AuditError::Unauthorized {
                actor: actor.to_string(),
                operation: "purge audit records".into(),
            });
        }
        if retention_days == 0 {
            return Err(AuditError::InvalidRequest(
                "retention_days must be at least 1".into(),
            ));
        }

        let cutoff = now_millis()
            .checked_sub_signed(ChronoDuration::days(i64::from(retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let report = {
            let _guard = self.verifier.maintenance().purging().await;
            self.purge_locked(cutoff).await?
        };

        info!(
            %actor,
            retention_days,
            purged = report.purged,
            through_seq = ?report.through_seq,
            "retention purge complete"
        );
        self.sink
            .record(
                NewAuditRecord::new(actor.clone(), ActionKind::RetentionPurge)
                    .with_entity("ledger")
                    .with_detail(json!({
                        "retention_days": retention_days,
                        "cutoff": cutoff.to_rfc3339(),
                        "purged": report.purged,
                        "through_seq": report.through_seq,
                    })),
            )
            .await;
        Ok(report)
    }

    async fn purge_locked(&self, cutoff: DateTime<Utc>) -> AuditResult<PurgeReport> {
        let store = self.verifier.store();
        let digest = self.verifier.digest();
        let anchor = store.anchor().await?;
        let mut cursor = ChainCursor::from_anchor(&anchor);
        let mut since = anchor.seq;
        let mut through: Option<u64> = None;

        'scan: loop {
            let batch = store.read_range(since, self.verifier.batch_size()).await?;
            if batch.is_empty() {
                break;
            }
            for record in &batch {
                if record.timestamp >= cutoff {
                    break 'scan;
                }
                if let Err(brk) = cursor.check(record, digest) {
                    self.verifier.report_break(brk).await;
                    return Err(AuditError::IntegrityViolation {
                        seq: brk.seq,
                        reason: format!("{} (purge aborted)", brk.kind),
                    });
                }
                through = Some(record.seq);
                since = record.seq;
            }
        }

        let Some(through_seq) = through else {
            return Ok(PurgeReport {
                cutoff,
                attempted: 0,
                purged: 0,
                through_seq: None,
            });
        };

        let outcome = store.purge_through(through_seq).await?;
        if !outcome.is_complete() {
            warn!(
                attempted = outcome.attempted,
                succeeded = outcome.succeeded,
                anchor_seq = outcome.anchor.seq,
                "retention purge stopped partway"
            );
            return Err(AuditError::PurgeIncomplete {
                attempted: outcome.attempted,
                succeeded: outcome.succeeded,
            });
        }

        Ok(PurgeReport {
            cutoff,
            attempted: outcome.attempted,
            purged: outcome.succeeded,
            through_seq: Some(outcome.anchor.seq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChainHead;
    use crate::store::{LedgerStore, MemoryLedgerStore};
    use crate::verify::MaintenanceLock;
    use crate::writer::persist_one;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use warden_core::{ActorRole, TracingAlertDispatcher};
    use warden_crypto::Sha256Digest;

    #[derive(Default)]
    struct Collect(Mutex<Vec<NewAuditRecord>>);

    #[async_trait]
    impl AuditSink for Collect {
        async fn record(&self, record: NewAuditRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn admin() -> Actor {
        Actor::new("ops", ActorRole::PlatformAdmin)
    }

    async fn seed(store: &MemoryLedgerStore, ages_days: &[i64]) {
        for age in ages_days {
            let at = Utc::now()
                .checked_sub_signed(ChronoDuration::days(*age))
                .unwrap();
            persist_one(
                store,
                &Sha256Digest,
                NewAuditRecord::new(Actor::system(), ActionKind::Login).at(at),
            )
            .await
            .unwrap();
        }
    }

    fn purger(store: Arc<MemoryLedgerStore>, sink: Arc<Collect>) -> (RetentionPurger, Arc<ChainVerifier>) {
        let verifier = Arc::new(ChainVerifier::new(
            store,
            Arc::new(Sha256Digest),
            Arc::new(TracingAlertDispatcher),
            MaintenanceLock::new(),
        ));
        (RetentionPurger::new(verifier.clone(), sink), verifier)
    }

    #[tokio::test]
    async fn test_requires_privileged_actor() {
        let store = Arc::new(MemoryLedgerStore::new());
        let (purger, _) = purger(store, Arc::new(Collect::default()));
        let member = Actor::new("coach", ActorRole::InstitutionAdmin);
        assert!(matches!(
            purger.purge(30, &member).await,
            Err(AuditError::Unauthorized { .. })
        ));
        assert!(matches!(
            purger.purge(0, &admin()).await,
            Err(AuditError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_purges_old_prefix_and_chain_stays_valid() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed(&store, &[90, 60, 45, 5, 1]).await;
        let sink = Arc::new(Collect::default());
        let (purger, verifier) = purger(store.clone(), sink.clone());

        let report = purger.purge(30, &admin()).await.unwrap();
        assert_eq!(report.purged, 3);
        assert_eq!(report.through_seq, Some(3));
        assert_eq!(store.count().await.unwrap(), 2);

        let result = verifier.verify_chain(100).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 2);

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].action, ActionKind::RetentionPurge);
        assert_eq!(recorded[0].detail["purged"], 3);
    }

    #[tokio::test]
    async fn test_stops_at_first_recent_record() {
        // Sequence order wins over timestamps: an old record after a recent
        // one is not purged.
        let store = Arc::new(MemoryLedgerStore::new());
        seed(&store, &[90, 1, 90]).await;
        let (purger, _) = purger(store.clone(), Arc::new(Collect::default()));
        let report = purger.purge(30, &admin()).await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tampered_prefix_blocks_purge() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed(&store, &[90, 60, 45]).await;
        store.tamper(2, |r| r.entity_ref = Some("forged".into())).await;
        let (purger, _) = purger(store.clone(), Arc::new(Collect::default()));

        assert!(matches!(
            purger.purge(30, &admin()).await,
            Err(AuditError::IntegrityViolation { seq: 2, .. })
        ));
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_nothing_old_enough() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed(&store, &[2, 1]).await;
        let (purger, _) = purger(store.clone(), Arc::new(Collect::default()));
        let report = purger.purge(30, &admin()).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(report.through_seq.is_none());
        assert_eq!(store.anchor().await.unwrap(), ChainHead::genesis());
    }
}
