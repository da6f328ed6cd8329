//! Ledger persistence contract and the in-memory implementation.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use warden_crypto::ContentHash;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditRecord, ChainHead};

/// Result of deleting a sequence prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Records the store tried to delete.
    pub attempted: u64,
    /// Records actually deleted.
    pub succeeded: u64,
    /// Anchor recorded for the last deleted record.
    pub anchor: ChainHead,
}

impl PurgeOutcome {
    /// Whether every targeted record was deleted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.attempted == self.succeeded
    }
}

/// Ordered, append-only persistence for ledger records.
///
/// Implementations must be thread-safe and enforce **compare-and-append**:
/// [`append_record`](Self::append_record) accepts a record only if its `seq`
/// is `head.seq + 1` and its `previous_hash` equals the head's chain hash,
/// atomically with respect to every other writer of the same store. This is
/// what keeps the chain linear when several processes write.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a sealed record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Conflict`] if the head moved since the record
    /// was sealed, or a storage error if persistence fails.
    async fn append_record(&self, record: &AuditRecord) -> AuditResult<()>;

    /// The current head: newest record, else the purge anchor, else genesis.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn head(&self) -> AuditResult<ChainHead>;

    /// Chain hash of the current head.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn latest_chain_hash(&self) -> AuditResult<ContentHash> {
        Ok(self.head().await?.chain_hash)
    }

    /// The newest persisted record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn latest(&self) -> AuditResult<Option<AuditRecord>>;

    /// Up to `limit` records with `seq > since_seq`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn read_range(&self, since_seq: u64, limit: usize) -> AuditResult<Vec<AuditRecord>>;

    /// Where verification must start: the last purged record, else genesis.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn anchor(&self) -> AuditResult<ChainHead>;

    /// Delete every record with `seq <= through_seq`, ascending, stopping at
    /// the first failure. The anchor is moved to the last record deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the range cannot be read or the anchor cannot be
    /// written. Per-record delete failures are reported in the outcome.
    async fn purge_through(&self, through_seq: u64) -> AuditResult<PurgeOutcome>;

    /// Number of records currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn count(&self) -> AuditResult<usize>;
}

pub(crate) fn check_append(head: &ChainHead, record: &AuditRecord) -> AuditResult<()> {
    if record.seq != head.next_seq() || record.previous_hash != head.chain_hash {
        return Err(AuditError::Conflict {
            expected_seq: head.next_seq(),
            found_seq: record.seq,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryLedger {
    records: BTreeMap<u64, AuditRecord>,
    anchor: ChainHead,
}

impl MemoryLedger {
    fn head(&self) -> ChainHead {
        self.records
            .values()
            .next_back()
            .map_or(self.anchor, AuditRecord::head)
    }
}

/// In-memory ledger store.
///
/// Compare-and-append is enforced under a single write lock. Everything is
/// lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<MemoryLedger>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record in place, bypassing every check.
    ///
    /// Exists to simulate tampering in tests and forensics drills.
    pub async fn tamper(&self, seq: u64, edit: impl FnOnce(&mut AuditRecord) + Send) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(&seq) {
            Some(record) => {
                edit(record);
                true
            },
            None => false,
        }
    }

    /// Remove a stored record without moving the anchor (simulated tampering).
    pub async fn remove_raw(&self, seq: u64) -> bool {
        self.inner.write().await.records.remove(&seq).is_some()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append_record(&self, record: &AuditRecord) -> AuditResult<()> {
        let mut inner = self.inner.write().await;
        check_append(&inner.head(), record)?;
        inner.records.insert(record.seq, record.clone());
        Ok(())
    }

    async fn head(&self) -> AuditResult<ChainHead> {
        Ok(self.inner.read().await.head())
    }

    async fn latest(&self) -> AuditResult<Option<AuditRecord>> {
        Ok(self.inner.read().await.records.values().next_back().cloned())
    }

    async fn read_range(&self, since_seq: u64, limit: usize) -> AuditResult<Vec<AuditRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .range((Bound::Excluded(since_seq), Bound::Unbounded))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn anchor(&self) -> AuditResult<ChainHead> {
        Ok(self.inner.read().await.anchor)
    }

    async fn purge_through(&self, through_seq: u64) -> AuditResult<PurgeOutcome> {
        let mut inner = self.inner.write().await;
        let targets: Vec<u64> = inner.records.range(..=through_seq).map(|(s, _)| *s).collect();
        let mut outcome = PurgeOutcome {
            attempted: targets.len() as u64,
            succeeded: 0,
            anchor: inner.anchor,
        };
        for seq in targets {
            if let Some(record) = inner.records.remove(&seq) {
                outcome.anchor = record.head();
                outcome.succeeded = outcome.succeeded.saturating_add(1);
            }
        }
        inner.anchor = outcome.anchor;
        Ok(outcome)
    }

    async fn count(&self) -> AuditResult<usize> {
        Ok(self.inner.read().await.records.len())
    }
}
