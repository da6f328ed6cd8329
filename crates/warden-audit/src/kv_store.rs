//! Ledger store over a namespaced [`KvStore`].
//!
//! Layout:
//! - `ledger:records` / `{seq:020}` → JSON [`AuditRecord`]
//! - `ledger:meta` / `head` → JSON [`ChainHead`]
//! - `ledger:meta` / `anchor` → JSON [`ChainHead`]
//!
//! Zero-padded keys make the store's ascending key order equal to sequence
//! order, so a page read is one range scan starting at `since + 1`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use warden_storage::{KvStore, ScopedKvStore};

use crate::error::AuditResult;
use crate::record::{AuditRecord, ChainHead};
use crate::store::{LedgerStore, PurgeOutcome, check_append};

const RECORDS_NS: &str = "ledger:records";
const META_NS: &str = "ledger:meta";
const HEAD_KEY: &str = "head";
const ANCHOR_KEY: &str = "anchor";

fn record_key(seq: u64) -> String {
    format!("{seq:020}")
}

fn parse_key(key: &str) -> Option<u64> {
    key.parse().ok()
}

/// Durable ledger store backed by any [`KvStore`].
///
/// Compare-and-append is serialized by an internal lock; a single embedded
/// store is owned by exactly one process, so the lock covers every writer.
pub struct KvLedgerStore {
    records: ScopedKvStore,
    meta: ScopedKvStore,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for KvLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvLedgerStore").finish_non_exhaustive()
    }
}

impl KvLedgerStore {
    /// Create a ledger store over the given KV backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespaces are rejected by the backend.
    pub fn new(store: Arc<dyn KvStore>) -> AuditResult<Self> {
        Ok(Self {
            records: ScopedKvStore::new(Arc::clone(&store), RECORDS_NS)?,
            meta: ScopedKvStore::new(store, META_NS)?,
            append_lock: Mutex::new(()),
        })
    }

    async fn stored_head(&self) -> AuditResult<Option<ChainHead>> {
        Ok(self.meta.get_json(HEAD_KEY).await?)
    }

    /// Records with `start_seq <= seq < end_seq`, ascending, at most `limit`.
    async fn scan_records(
        &self,
        start_seq: u64,
        end_seq: Option<u64>,
        limit: usize,
    ) -> AuditResult<Vec<AuditRecord>> {
        let end = end_seq.map(record_key);
        Ok(self
            .records
            .scan_json::<AuditRecord>(&record_key(start_seq), end.as_deref(), limit)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }
}

#[async_trait]
impl LedgerStore for KvLedgerStore {
    async fn append_record(&self, record: &AuditRecord) -> AuditResult<()> {
        let _guard = self.append_lock.lock().await;
        let head = self.head().await?;
        check_append(&head, record)?;

        self.records.set_json(&record_key(record.seq), record).await?;
        self.meta.set_json(HEAD_KEY, &record.head()).await?;
        debug!(seq = record.seq, hash = %record.chain_hash.short(), "ledger record persisted");
        Ok(())
    }

    async fn head(&self) -> AuditResult<ChainHead> {
        match self.stored_head().await? {
            Some(head) => Ok(head),
            None => self.anchor().await,
        }
    }

    async fn latest(&self) -> AuditResult<Option<AuditRecord>> {
        let Some(head) = self.stored_head().await? else {
            return Ok(None);
        };
        Ok(self.records.get_json(&record_key(head.seq)).await?)
    }

    async fn read_range(&self, since_seq: u64, limit: usize) -> AuditResult<Vec<AuditRecord>> {
        match since_seq.checked_add(1) {
            Some(start) => self.scan_records(start, None, limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn anchor(&self) -> AuditResult<ChainHead> {
        Ok(self
            .meta
            .get_json::<ChainHead>(ANCHOR_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn purge_through(&self, through_seq: u64) -> AuditResult<PurgeOutcome> {
        let _guard = self.append_lock.lock().await;
        let targets = self
            .scan_records(0, through_seq.checked_add(1), usize::MAX)
            .await?;

        let mut outcome = PurgeOutcome {
            attempted: targets.len() as u64,
            succeeded: 0,
            anchor: self.anchor().await?,
        };

        for record in targets {
            let seq = record.seq;
            match self.records.delete(&record_key(seq)).await {
                Ok(true) => {
                    outcome.anchor = record.head();
                    outcome.succeeded = outcome.succeeded.saturating_add(1);
                },
                Ok(false) => {
                    warn!(seq, "ledger record vanished during purge");
                    break;
                },
                Err(e) => {
                    warn!(seq, error = %e, "failed to delete ledger record, stopping purge");
                    break;
                },
            }
        }

        // The stored head is left alone: once every record is gone it
        // equals the anchor.
        if outcome.succeeded > 0 {
            self.meta.set_json(ANCHOR_KEY, &outcome.anchor).await?;
        }
        Ok(outcome)
    }

    async fn count(&self) -> AuditResult<usize> {
        // Skip anything foreign to this layout.
        Ok(self
            .records
            .list_keys()
            .await?
            .iter()
            .filter(|k| parse_key(k).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::record::{ActionKind, NewAuditRecord};
    use warden_core::Actor;
    use warden_crypto::Sha256Digest;
    use warden_storage::MemoryKvStore;

    async fn append(store: &KvLedgerStore) -> AuditRecord {
        let head = store.head().await.unwrap();
        let record = AuditRecord::seal(
            NewAuditRecord::new(Actor::system(), ActionKind::DataMutation),
            &head,
            &Sha256Digest,
        );
        store.append_record(&record).await.unwrap();
        record
    }

    #[test]
    fn test_record_keys_sort_numerically() {
        assert!(record_key(9) < record_key(10));
        assert_eq!(parse_key(&record_key(42)), Some(42));
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = KvLedgerStore::new(Arc::clone(&kv)).unwrap();
        let first = append(&store).await;
        let second = append(&store).await;

        let reopened = KvLedgerStore::new(kv).unwrap();
        assert_eq!(reopened.head().await.unwrap(), second.head());
        assert_eq!(reopened.latest().await.unwrap(), Some(second.clone()));
        assert_eq!(reopened.read_range(0, 10).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_conflict_on_stale_head() {
        let store = KvLedgerStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        let stale = AuditRecord::seal(
            NewAuditRecord::new(Actor::system(), ActionKind::Login),
            &ChainHead::genesis(),
            &Sha256Digest,
        );
        append(&store).await;
        assert!(matches!(
            store.append_record(&stale).await,
            Err(AuditError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_purge_everything_then_continue() {
        let store = KvLedgerStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        let mut last = None;
        for _ in 0..3 {
            last = Some(append(&store).await);
        }
        let last = last.unwrap();

        let outcome = store.purge_through(3).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.anchor().await.unwrap(), last.head());
        assert_eq!(store.head().await.unwrap(), last.head());
        assert!(store.latest().await.unwrap().is_none());

        let next = append(&store).await;
        assert_eq!(next.seq, 4);
        assert_eq!(next.previous_hash, last.chain_hash);
    }

    #[tokio::test]
    async fn test_read_range_pages_from_since() {
        let store = KvLedgerStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        for _ in 0..7 {
            append(&store).await;
        }

        let seqs = |records: Vec<AuditRecord>| -> Vec<u64> {
            records.iter().map(|r| r.seq).collect()
        };
        assert_eq!(seqs(store.read_range(0, 3).await.unwrap()), vec![1, 2, 3]);
        assert_eq!(seqs(store.read_range(3, 3).await.unwrap()), vec![4, 5, 6]);
        assert_eq!(seqs(store.read_range(6, 3).await.unwrap()), vec![7]);
        assert!(store.read_range(7, 3).await.unwrap().is_empty());
        assert!(store.read_range(u64::MAX, 3).await.unwrap().is_empty());

        let outcome = store.purge_through(2).await.unwrap();
        assert_eq!(outcome.attempted, 2);
        assert_eq!(seqs(store.read_range(0, 2).await.unwrap()), vec![3, 4]);
    }
}
