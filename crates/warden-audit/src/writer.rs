//! Single-consumer ledger writer.
//!
//! Producers call [`LedgerWriter::append`], which enqueues and returns
//! immediately. One background task drains the queue strictly one record
//! at a time: read the head, seal against it, compare-and-append.
//!
//! # Delivery contract
//!
//! Best-effort, at-most-once. A record that fails to persist is logged and
//! counted, and the consumer moves on to the next one. Records still queued
//! when the process dies are lost; use
//! [`SpooledLedgerWriter`](crate::SpooledLedgerWriter) where that matters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_crypto::Digest;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditRecord, NewAuditRecord};
use crate::store::LedgerStore;

/// How many times a record is re-sealed after losing a compare-and-append race.
pub(crate) const MAX_CONFLICT_RETRIES: u32 = 8;

/// Anything that accepts audit events without failing the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Submit an event. Never returns an error; failures are logged.
    async fn record(&self, record: NewAuditRecord);
}

/// Seal `new` against the current head and append it, re-sealing on conflict.
pub(crate) async fn persist_one(
    store: &dyn LedgerStore,
    digest: &dyn Digest,
    new: NewAuditRecord,
) -> AuditResult<AuditRecord> {
    let mut attempt: u32 = 0;
    loop {
        let head = store.head().await?;
        let record = AuditRecord::seal(new.clone(), &head, digest);
        match store.append_record(&record).await {
            Ok(()) => return Ok(record),
            Err(AuditError::Conflict {
                expected_seq,
                found_seq,
            }) if attempt < MAX_CONFLICT_RETRIES => {
                attempt = attempt.saturating_add(1);
                warn!(expected_seq, found_seq, attempt, "ledger head moved, re-sealing");
            },
            Err(e) => return Err(e),
        }
    }
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records accepted onto the queue.
    pub enqueued: u64,
    /// Records persisted to the ledger.
    pub persisted: u64,
    /// Records that failed to persist.
    pub failed: u64,
    /// Records rejected because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

impl StatCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WriterStats {
        WriterStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum WriterCommand {
    Append(Box<NewAuditRecord>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Volatile, in-process ledger writer.
pub struct LedgerWriter {
    tx: mpsc::Sender<WriterCommand>,
    stats: Arc<StatCounters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerWriter")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl LedgerWriter {
    /// Spawn the consumer task on the current tokio runtime.
    ///
    /// `capacity` bounds the queue; it is clamped to at least 1.
    #[must_use]
    pub fn spawn(store: Arc<dyn LedgerStore>, digest: Arc<dyn Digest>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(StatCounters::default());
        let handle = tokio::spawn(run(store, digest, rx, Arc::clone(&stats)));
        Self {
            tx,
            stats,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a record and return immediately.
    ///
    /// If the queue is full or closed the record is dropped and logged; the
    /// caller is never blocked or failed.
    pub fn append(&self, record: NewAuditRecord) {
        let action = record.action;
        match self.tx.try_send(WriterCommand::Append(Box::new(record))) {
            Ok(()) => StatCounters::bump(&self.stats.enqueued),
            Err(mpsc::error::TrySendError::Full(_)) => {
                StatCounters::bump(&self.stats.dropped);
                error!(%action, "ledger queue full, audit record dropped");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                StatCounters::bump(&self.stats.dropped);
                error!(%action, "ledger writer closed, audit record dropped");
            },
        }
    }

    /// Wait until every record enqueued before this call has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::WriterClosed`] if the writer has shut down.
    pub async fn flush(&self) -> AuditResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(done_tx))
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        done_rx.await.map_err(|_| AuditError::WriterClosed)
    }

    /// Drain the queue, stop the consumer and wait for it to exit.
    ///
    /// Appends after shutdown are dropped. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "ledger writer task failed");
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.stats.snapshot()
    }
}

#[async_trait]
impl AuditSink for LedgerWriter {
    async fn record(&self, record: NewAuditRecord) {
        self.append(record);
    }
}

async fn run(
    store: Arc<dyn LedgerStore>,
    digest: Arc<dyn Digest>,
    mut rx: mpsc::Receiver<WriterCommand>,
    stats: Arc<StatCounters>,
) {
    info!(algorithm = %digest.algorithm(), "ledger writer started");
    let mut on_exit = None;

    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Append(new) => {
                let action = new.action;
                match persist_one(store.as_ref(), digest.as_ref(), *new).await {
                    Ok(record) => {
                        StatCounters::bump(&stats.persisted);
                        debug!(seq = record.seq, %action, "audit record appended");
                    },
                    Err(e) => {
                        StatCounters::bump(&stats.failed);
                        error!(%action, error = %e, "failed to persist audit record");
                    },
                }
            },
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            },
            WriterCommand::Shutdown(done) => {
                // Already-queued commands are still delivered after close().
                rx.close();
                on_exit = Some(done);
            },
        }
    }

    info!(stats = ?stats.snapshot(), "ledger writer stopped");
    if let Some(done) = on_exit {
        let _ = done.send(());
    }
}
