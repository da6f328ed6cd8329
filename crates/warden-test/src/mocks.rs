//! Mock implementations for testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use warden_audit::{
    ActionKind, AuditError, AuditRecord, AuditResult, AuditSink, ChainHead, LedgerStore,
    NewAuditRecord, PurgeOutcome,
};
use warden_core::{Alert, AlertDispatcher, Severity};

/// Alert dispatcher that keeps every alert it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertDispatcher {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingAlertDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts received so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Alerts of one severity.
    #[must_use]
    pub fn of_severity(&self, severity: Severity) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|g| g.iter().filter(|a| a.severity == severity).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of alerts received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.alerts.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Forget every alert.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.alerts.lock() {
            guard.clear();
        }
    }
}

#[async_trait]
impl AlertDispatcher for RecordingAlertDispatcher {
    async fn notify(&self, alert: Alert) {
        if let Ok(mut guard) = self.alerts.lock() {
            guard.push(alert);
        }
    }
}

/// Audit sink that collects events instead of chaining them.
#[derive(Debug, Clone, Default)]
pub struct CollectingAuditSink {
    records: Arc<Mutex<Vec<NewAuditRecord>>>,
}

impl CollectingAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in order.
    #[must_use]
    pub fn records(&self) -> Vec<NewAuditRecord> {
        self.records.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Events of one action kind.
    #[must_use]
    pub fn of_action(&self, action: ActionKind) -> Vec<NewAuditRecord> {
        self.records
            .lock()
            .map(|g| g.iter().filter(|r| r.action == action).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any event of `action` was received.
    #[must_use]
    pub fn has_action(&self, action: ActionKind) -> bool {
        self.records
            .lock()
            .map(|g| g.iter().any(|r| r.action == action))
            .unwrap_or(false)
    }

    /// Number of events received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.lock().map(|g| g.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn record(&self, record: NewAuditRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }
}

/// Ledger store whose appends fail a set number of times before reaching
/// the wrapped store.
pub struct FlakyLedgerStore {
    inner: Arc<dyn LedgerStore>,
    failures_left: AtomicU32,
}

impl std::fmt::Debug for FlakyLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyLedgerStore")
            .field("failures_left", &self.remaining_failures())
            .finish_non_exhaustive()
    }
}

impl FlakyLedgerStore {
    /// Fail the next `failures` appends to `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn LedgerStore>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
        }
    }

    /// Fail `failures` more appends.
    pub fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    /// Appends still scheduled to fail.
    #[must_use]
    pub fn remaining_failures(&self) -> u32 {
        self.failures_left.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn append_record(&self, record: &AuditRecord) -> AuditResult<()> {
        if self.take_failure() {
            return Err(AuditError::StorageError(format!(
                "injected failure appending seq {}",
                record.seq
            )));
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
