//! Durable-queue ledger writer.
//!
//! [`SpooledLedgerWriter::append`] persists the event to a spool namespace
//! before returning, then wakes the single consumer, which drains the spool
//! in order. Events spooled before a crash are replayed on the next start.
//!
//! The window between "appended to the ledger" and "removed from the spool"
//! is closed by comparing the spooled `event_id` with the ledger's newest
//! record: a match means the event already made it and is only unspooled.
//!
//! An entry that cannot be decoded, or that keeps failing to persist after
//! `max_attempts` tries, is moved to the `ledger:spool:dead` namespace and
//! counted once as failed, so the events behind it keep flowing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_crypto::Digest;
use warden_storage::{KvStore, ScopedKvStore};

use crate::error::{AuditError, AuditResult};
use crate::record::NewAuditRecord;
use crate::store::LedgerStore;
use crate::writer::{AuditSink, StatCounters, WriterStats, persist_one};

const SPOOL_NS: &str = "ledger:spool";
const DEAD_NS: &str = "ledger:spool:dead";

/// Delay before retrying a spooled event whose persistence failed.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Persistence attempts before a spooled event is dead-lettered.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

fn spool_key(n: u64) -> String {
    format!("{n:020}")
}

struct Shared {
    spool: ScopedKvStore,
    dead: ScopedKvStore,
    store: Arc<dyn LedgerStore>,
    digest: Arc<dyn Digest>,
    stats: StatCounters,
    wake: Notify,
    pending: watch::Sender<u64>,
    retry_delay: Duration,
    max_attempts: u32,
}

/// Ledger writer whose queue survives process restarts.
pub struct SpooledLedgerWriter {
    shared: Arc<Shared>,
    next_key: AtomicU64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SpooledLedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpooledLedgerWriter")
            .field("stats", &self.shared.stats.snapshot())
            .field("pending", &*self.shared.pending.borrow())
            .finish_non_exhaustive()
    }
}

impl SpooledLedgerWriter {
    /// Open the spool in `spool_store`, schedule replay of anything left in
    /// it, and spawn the consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the spool cannot be listed.
    pub async fn spawn(
        spool_store: Arc<dyn KvStore>,
        store: Arc<dyn LedgerStore>,
        digest: Arc<dyn Digest>,
    ) -> AuditResult<Self> {
        Self::spawn_with_retry(
            spool_store,
            store,
            digest,
            DEFAULT_RETRY_DELAY,
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
    }

    /// Like [`spawn`](Self::spawn) with an explicit retry delay and the
    /// number of attempts after which a failing event is dead-lettered.
    ///
    /// # Errors
    ///
    /// Returns an error if the spool cannot be listed.
    pub async fn spawn_with_retry(
        spool_store: Arc<dyn KvStore>,
        store: Arc<dyn LedgerStore>,
        digest: Arc<dyn Digest>,
        retry_delay: Duration,
        max_attempts: u32,
    ) -> AuditResult<Self> {
        let spool = ScopedKvStore::new(Arc::clone(&spool_store), SPOOL_NS)?;
        let dead = ScopedKvStore::new(spool_store, DEAD_NS)?;
        let existing = spool.list_keys().await?;
        let next_key = existing
            .last()
            .and_then(|k| k.parse::<u64>().ok())
            .map_or(0, |n| n.saturating_add(1));
        let leftover = existing.len() as u64;
        if leftover > 0 {
            info!(leftover, "replaying spooled audit events");
        }

        let (pending, _) = watch::channel(leftover);
        let shared = Arc::new(Shared {
            spool,
            dead,
            store,
            digest,
            stats: StatCounters::default(),
            wake: Notify::new(),
            pending,
            retry_delay,
            max_attempts: max_attempts.max(1),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&shared), cancel.clone()));

        Ok(Self {
            shared,
            next_key: AtomicU64::new(next_key),
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Spool an event durably, then wake the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::WriterClosed`] after shutdown, or a storage
    /// error if the spool write fails.
    pub async fn append(&self, record: NewAuditRecord) -> AuditResult<()> {
        if self.cancel.is_cancelled() {
            StatCounters::bump(&self.shared.stats.dropped);
            return Err(AuditError::WriterClosed);
        }
        let key = spool_key(self.next_key.fetch_add(1, Ordering::SeqCst));
        // Counted before the write so the consumer can never decrement first.
        self.shared.pending.send_modify(|n| *n = n.saturating_add(1));
        if let Err(e) = self.shared.spool.set_json(&key, &record).await {
            self.shared.pending.send_modify(|n| *n = n.saturating_sub(1));
            StatCounters::bump(&self.shared.stats.dropped);
            return Err(e.into());
        }
        StatCounters::bump(&self.shared.stats.enqueued);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Wait until the spool is empty.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::WriterClosed`] if the writer was shut down with
    /// events still spooled.
    pub async fn flush(&self) -> AuditResult<()> {
        if self.cancel.is_cancelled() && self.pending() > 0 {
            return Err(AuditError::WriterClosed);
        }
        let mut rx = self.shared.pending.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| AuditError::WriterClosed)
    }

    /// Stop the consumer after a final drain pass.
    ///
    /// Events that still could not be persisted stay spooled for the next start.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "spooled ledger writer task failed");
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.shared.stats.snapshot()
    }

    /// Events spooled but not yet in the ledger.
    #[must_use]
    pub fn pending(&self) -> u64 {
        *self.shared.pending.borrow()
    }

    /// Keys of events moved out of the spool after failing for good.
    ///
    /// # Errors
    ///
    /// Returns an error if the dead-letter namespace cannot be listed.
    pub async fn dead_letters(&self) -> AuditResult<Vec<String>> {
        Ok(self.shared.dead.list_keys().await?)
    }
}

#[async_trait]
impl AuditSink for SpooledLedgerWriter {
    async fn record(&self, record: NewAuditRecord) {
        let action = record.action;
        if let Err(e) = self.append(record).await {
            error!(%action, error = %e, "failed to spool audit record");
        }
    }
}

enum Drain {
    Empty,
    Stalled,
}

/// Why a spooled event could not be persisted.
enum Fault {
    /// The spooled bytes are not an event. Retrying cannot help.
    Undecodable(String),
    /// The ledger or spool failed.
    Persist(AuditError),
}

impl From<AuditError> for Fault {
    fn from(err: AuditError) -> Self {
        Self::Persist(err)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undecodable(msg) => write!(f, "undecodable spool entry: {msg}"),
            Self::Persist(e) => write!(f, "{e}"),
        }
    }
}

/// The spool entry currently failing and how often it has been tried.
#[derive(Debug, Default)]
struct Attempts {
    key: Option<String>,
    count: u32,
}

impl Attempts {
    fn record_failure(&mut self, key: &str) -> u32 {
        if self.key.as_deref() == Some(key) {
            self.count = self.count.saturating_add(1);
        } else {
            self.key = Some(key.to_owned());
            self.count = 1;
        }
        self.count
    }

    fn clear(&mut self) {
        self.key = None;
        self.count = 0;
    }
}

/// Persist spooled events in key order until the spool is empty or an
/// event fails and still has attempts left. An event out of attempts is
/// dead-lettered and draining continues with the next one.
async fn drain(shared: &Shared, attempts: &mut Attempts) -> Drain {
    let keys = match shared.spool.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "failed to list audit spool");
            return Drain::Stalled;
        },
    };

    for key in keys {
        let fault = match persist_spooled(shared, &key).await {
            Ok(()) => {
                attempts.clear();
                shared.pending.send_modify(|n| *n = n.saturating_sub(1));
                continue;
            },
            Err(fault) => fault,
        };

        let tries = attempts.record_failure(&key);
        let exhausted = matches!(fault, Fault::Undecodable(_)) || tries >= shared.max_attempts;
        if !exhausted {
            warn!(spool_key = %key, attempt = tries, error = %fault, "spooled audit record not persisted, will retry");
            return Drain::Stalled;
        }

        match dead_letter(shared, &key).await {
            Ok(()) => {
                attempts.clear();
                StatCounters::bump(&shared.stats.failed);
                shared.pending.send_modify(|n| *n = n.saturating_sub(1));
                error!(spool_key = %key, attempts = tries, error = %fault, "audit record dead-lettered");
            },
            Err(e) => {
                error!(spool_key = %key, error = %e, "failed to dead-letter spooled audit record");
                return Drain::Stalled;
            },
        }
    }
    Drain::Empty
}

async fn persist_spooled(shared: &Shared, key: &str) -> Result<(), Fault> {
    let Some(bytes) = shared.spool.get(key).await.map_err(AuditError::from)? else {
        return Ok(());
    };
    let new: NewAuditRecord =
        serde_json::from_slice(&bytes).map_err(|e| Fault::Undecodable(e.to_string()))?;

    let already_persisted = shared
        .store
        .latest()
        .await?
        .is_some_and(|latest| latest.event_id == new.event_id);

    if already_persisted {
        warn!(event_id = %new.event_id, "spooled event already in ledger, skipping");
    } else {
        let record = persist_one(shared.store.as_ref(), shared.digest.as_ref(), new).await?;
        StatCounters::bump(&shared.stats.persisted);
        debug!(seq = record.seq, action = %record.action, "spooled audit record appended");
    }

    shared.spool.delete(key).await.map_err(AuditError::from)?;
    Ok(())
}

/// Move the raw entry at `key` to the dead-letter namespace.
async fn dead_letter(shared: &Shared, key: &str) -> AuditResult<()> {
    if let Some(bytes) = shared.spool.get(key).await? {
        shared
            .dead
            .set(&format!("{key}-{}", Uuid::new_v4().simple()), bytes)
            .await?;
    }
    shared.spool.delete(key).await?;
    Ok(())
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    info!(algorithm = %shared.digest.algorithm(), "spooled ledger writer started");

    let mut attempts = Attempts::default();
    loop {
        let state = drain(&shared, &mut attempts).await;
        let retry = matches!(state, Drain::Stalled);

        tokio::select! {
            () = cancel.cancelled() => break,
            () = shared.wake.notified() => {},
            () = tokio::time::sleep(shared.retry_delay), if retry => {},
        }
    }

    if matches!(drain(&shared, &mut attempts).await, Drain::Stalled) {
        warn!(pending = *shared.pending.borrow(), "audit events left in spool at shutdown");
    }
    info!(stats = ?shared.stats.snapshot(), "spooled ledger writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ActionKind, AuditRecord, ChainHead};
    use crate::store::{MemoryLedgerStore, PurgeOutcome};
    use warden_core::Actor;
    use warden_crypto::Sha256Digest;
    use warden_storage::MemoryKvStore;

    fn event(action: ActionKind) -> NewAuditRecord {
        NewAuditRecord::new(Actor::system(), action)
    }

    /// Ledger that refuses every `Login` record.
    #[derive(Debug, Default)]
    struct RejectsLogins {
        inner: MemoryLedgerStore,
    }

    #[async_trait]
    impl LedgerStore for RejectsLogins {
        async fn append_record(&self, record: &AuditRecord) -> AuditResult<()> {
            if record.action == ActionKind::Login {
                return Err(AuditError::StorageError("disk full".into()));
            }
            self.inner.append_record(record).await
        }

        async fn head(&self) -> AuditResult<ChainHead> {
            self.inner.head().await
        }

        async fn latest(&self) -> AuditResult<Option<AuditRecord>> {
            self.inner.latest().await
        }

        async fn read_range(&self, since_seq: u64, limit: usize) -> AuditResult<Vec<AuditRecord>> {
            self.inner.read_range(since_seq, limit).await
        }

        async fn anchor(&self) -> AuditResult<ChainHead> {
            self.inner.anchor().await
        }

        async fn purge_through(&self, through_seq: u64) -> AuditResult<PurgeOutcome> {
            self.inner.purge_through(through_seq).await
        }

        async fn count(&self) -> AuditResult<usize> {
            self.inner.count().await
        }
    }

    async fn flush_within(writer: &SpooledLedgerWriter) {
        tokio::time::timeout(Duration::from_secs(2), writer.flush())
            .await
            .expect("flush stalled")
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_and_flush() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let writer = SpooledLedgerWriter::spawn(kv.clone(), store.clone(), Arc::new(Sha256Digest))
            .await
            .unwrap();

        for _ in 0..5 {
            writer.append(event(ActionKind::Registration)).await.unwrap();
        }
        writer.flush().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 5);
        assert!(kv.list_keys(SPOOL_NS).await.unwrap().is_empty());
        assert_eq!(writer.stats().persisted, 5);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_replays_leftover_spool() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let spool = ScopedKvStore::new(kv.clone(), SPOOL_NS).unwrap();
        spool.set_json(&spool_key(0), &event(ActionKind::Login)).await.unwrap();
        spool.set_json(&spool_key(1), &event(ActionKind::Logout)).await.unwrap();

        let store = Arc::new(MemoryLedgerStore::new());
        let writer = SpooledLedgerWriter::spawn(kv, store.clone(), Arc::new(Sha256Digest))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let actions: Vec<_> = store
            .read_range(0, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions, vec![ActionKind::Login, ActionKind::Logout]);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_replay_does_not_duplicate_persisted_event() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(MemoryLedgerStore::new());

        // Crash between ledger append and spool removal.
        let new = event(ActionKind::AdminOverride);
        let sealed = AuditRecord::seal(new.clone(), &store.head().await.unwrap(), &Sha256Digest);
        store.append_record(&sealed).await.unwrap();
        let spool = ScopedKvStore::new(kv.clone(), SPOOL_NS).unwrap();
        spool.set_json(&spool_key(0), &new).await.unwrap();

        let writer = SpooledLedgerWriter::spawn(kv, store.clone(), Arc::new(Sha256Digest))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(writer.stats().persisted, 0);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_after_shutdown_is_rejected() {
        let writer = SpooledLedgerWriter::spawn(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(Sha256Digest),
        )
        .await
        .unwrap();
        writer.shutdown().await;
        assert!(matches!(
            writer.append(event(ActionKind::Login)).await,
            Err(AuditError::WriterClosed)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_entry_does_not_block_later_events() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let spool = ScopedKvStore::new(kv.clone(), SPOOL_NS).unwrap();
        spool.set(&spool_key(0), b"not json".to_vec()).await.unwrap();
        spool.set_json(&spool_key(1), &event(ActionKind::Login)).await.unwrap();

        let store = Arc::new(MemoryLedgerStore::new());
        let writer = SpooledLedgerWriter::spawn(kv.clone(), store.clone(), Arc::new(Sha256Digest))
            .await
            .unwrap();
        writer.append(event(ActionKind::Logout)).await.unwrap();
        flush_within(&writer).await;

        let actions: Vec<_> = store
            .read_range(0, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions, vec![ActionKind::Login, ActionKind::Logout]);

        let stats = writer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.persisted, 2);
        assert_eq!(writer.pending(), 0);

        let dead = writer.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].starts_with(&spool_key(0)));
        let raw = kv.get(DEAD_NS, &dead[0]).await.unwrap();
        assert_eq!(raw, Some(b"not json".to_vec()));
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_event_dead_lettered_after_max_attempts() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(RejectsLogins::default());
        let writer = SpooledLedgerWriter::spawn_with_retry(
            kv.clone(),
            store.clone(),
            Arc::new(Sha256Digest),
            Duration::from_millis(10),
            3,
        )
        .await
        .unwrap();

        writer.append(event(ActionKind::Login)).await.unwrap();
        writer.append(event(ActionKind::Logout)).await.unwrap();
        flush_within(&writer).await;

        let records = store.read_range(0, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, ActionKind::Logout);

        // One record failed, however many times it was retried.
        assert_eq!(writer.stats().failed, 1);
        assert_eq!(writer.dead_letters().await.unwrap().len(), 1);
        assert!(kv.list_keys(SPOOL_NS).await.unwrap().is_empty());
        writer.shutdown().await;
    }
}
