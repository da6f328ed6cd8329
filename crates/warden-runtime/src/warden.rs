//! The [`Warden`] facade.
//!
//! One `Warden` owns the ledger writer, chain verifier, retention purger,
//! reputation store and abuse engine for a process, wires them to a shared
//! audit sink, and runs their background tasks until [`Warden::shutdown`].

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_abuse::{
    AbuseEngine, Decision, Detection, EventType, Fingerprint, FingerprintInput, FingerprintStore,
    KvFingerprintStore, MemoryFingerprintStore, ScoringPolicy,
};
use warden_audit::{
    ActionKind, AuditResult, AuditSink, ChainVerification, ChainVerifier, KvLedgerStore,
    LedgerStore, LedgerWriter, MaintenanceLock, MemoryLedgerStore, NewAuditRecord, PurgeReport,
    RetentionPurger, SpooledLedgerWriter, WriterStats,
};
use warden_config::{Config, QueueMode, StorageBackend};
use warden_core::{Actor, AlertDispatcher, TracingAlertDispatcher};
use warden_crypto::FingerprintHasher;
use warden_reputation::{
    BlockEntry, BlockStatus, IpReputationStore, KvReputationBackend, MemoryReputationBackend,
    ReputationBackend,
};
use warden_storage::{KvStore, SurrealKvStore};

use crate::config_bridge;
use crate::error::{WardenError, WardenResult};

/// A scored attempt that the caller may proceed with.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// Hashed signals of the attempt.
    pub fingerprint: Fingerprint,
    /// Score, severity and decision.
    pub detection: Detection,
}

impl GateOutcome {
    /// Whether the attempt was soft-flagged.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.detection.decision() == Decision::SoftFlag
    }
}

/// What [`Warden::purge`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    /// Ledger prefix purge.
    pub ledger: PurgeReport,
    /// Fingerprint records deleted with the same cutoff.
    pub fingerprints: u64,
}

/// The configured writer variant.
enum Ledger {
    Volatile(Arc<LedgerWriter>),
    Spooled(Arc<SpooledLedgerWriter>),
}

impl Ledger {
    fn sink(&self) -> Arc<dyn AuditSink> {
        match self {
            Self::Volatile(w) => Arc::clone(w) as Arc<dyn AuditSink>,
            Self::Spooled(w) => Arc::clone(w) as Arc<dyn AuditSink>,
        }
    }

    async fn flush(&self) -> AuditResult<()> {
        match self {
            Self::Volatile(w) => w.flush().await,
            Self::Spooled(w) => w.flush().await,
        }
    }

    async fn shutdown(&self) {
        match self {
            Self::Volatile(w) => w.shutdown().await,
            Self::Spooled(w) => w.shutdown().await,
        }
    }

    fn stats(&self) -> WriterStats {
        match self {
            Self::Volatile(w) => w.stats(),
            Self::Spooled(w) => w.stats(),
        }
    }
}

/// Builds a [`Warden`] from configuration, with optional component
/// overrides.
pub struct WardenBuilder {
    config: Config,
    alerts: Option<Arc<dyn AlertDispatcher>>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    fingerprint_store: Option<Arc<dyn FingerprintStore>>,
}

impl fmt::Debug for WardenBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WardenBuilder")
            .field("config", &self.config)
            .field("custom_alerts", &self.alerts.is_some())
            .field("custom_ledger_store", &self.ledger_store.is_some())
            .field("custom_fingerprint_store", &self.fingerprint_store.is_some())
            .finish()
    }
}

impl WardenBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            alerts: None,
            ledger_store: None,
            fingerprint_store: None,
        }
    }

    /// Send alerts here instead of to the log.
    #[must_use]
    pub fn alerts(mut self, alerts: Arc<dyn AlertDispatcher>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Persist the ledger here instead of the configured store.
    #[must_use]
    pub fn ledger_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(store);
        self
    }

    /// Keep the fingerprint corpus here instead of the configured store.
    #[must_use]
    pub fn fingerprint_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.fingerprint_store = Some(store);
        self
    }

    /// Validate the configuration, open stores and start background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] for an invalid configuration and
    /// [`WardenError::Persistence`] if a durable store cannot be opened.
    pub async fn build(self) -> WardenResult<Warden> {
        let cfg = self.config;
        warden_config::validate::validate(&cfg)?;

        let algorithm = config_bridge::to_digest_algorithm(&cfg)?;
        let digest = algorithm.digester();
        let alerts = self
            .alerts
            .unwrap_or_else(|| Arc::new(TracingAlertDispatcher) as Arc<dyn AlertDispatcher>);
        let durable = open_durable(&cfg)?;

        let ledger_store: Arc<dyn LedgerStore> = match self.ledger_store {
            Some(store) => store,
            None => match cfg.ledger.storage {
                StorageBackend::Memory => Arc::new(MemoryLedgerStore::new()),
                StorageBackend::Durable => Arc::new(KvLedgerStore::new(durable_kv(durable.as_ref())?)?),
            },
        };

        let ledger = match cfg.ledger.queue_mode {
            QueueMode::Volatile => Ledger::Volatile(Arc::new(LedgerWriter::spawn(
                Arc::clone(&ledger_store),
                Arc::clone(&digest),
                cfg.ledger.queue_capacity,
            ))),
            QueueMode::Spooled => Ledger::Spooled(Arc::new(
                SpooledLedgerWriter::spawn(
                    durable_kv(durable.as_ref())?,
                    Arc::clone(&ledger_store),
                    Arc::clone(&digest),
                )
                .await?,
            )),
        };
        let sink = ledger.sink();

        let verifier = Arc::new(
            ChainVerifier::new(
                Arc::clone(&ledger_store),
                digest,
                Arc::clone(&alerts),
                MaintenanceLock::new(),
            )
            .with_sink(Arc::clone(&sink)),
        );
        let purger = RetentionPurger::new(Arc::clone(&verifier), Arc::clone(&sink));

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let sweep_interval = config_bridge::to_sweep_interval(&cfg);

        let backend: Arc<dyn ReputationBackend> = match cfg.reputation.backend {
            StorageBackend::Memory => {
                let memory = Arc::new(MemoryReputationBackend::new());
                tasks.push(memory.spawn_sweeper(sweep_interval, cancel.child_token()));
                memory
            },
            StorageBackend::Durable => {
                let kv = Arc::new(KvReputationBackend::new(durable_kv(durable.as_ref())?)?);
                tasks.push(spawn_expiry_purge(
                    Arc::clone(&kv),
                    sweep_interval,
                    cancel.child_token(),
                ));
                kv
            },
        };
        let reputation =
            IpReputationStore::new(backend, config_bridge::to_default_block_ttl(&cfg));

        let fingerprints: Arc<dyn FingerprintStore> = match self.fingerprint_store {
            Some(store) => store,
            None => match cfg.ledger.storage {
                StorageBackend::Memory => Arc::new(MemoryFingerprintStore::new()),
                StorageBackend::Durable => {
                    Arc::new(KvFingerprintStore::new(durable_kv(durable.as_ref())?)?)
                },
            },
        };

        let engine = AbuseEngine::new(
            fingerprints,
            reputation.clone(),
            Arc::clone(&sink),
            alerts,
            config_bridge::to_scoring_policy(&cfg),
        );

        let verify_limit = config_bridge::to_verify_limit(&cfg);
        if let Some(interval) = config_bridge::to_verify_interval(&cfg) {
            tasks.push(spawn_periodic_verify(
                Arc::clone(&verifier),
                interval,
                verify_limit,
                cancel.child_token(),
            ));
        }

        info!(
            ledger_storage = ?cfg.ledger.storage,
            queue_mode = ?cfg.ledger.queue_mode,
            reputation = reputation.backend_name(),
            digest = %algorithm,
            "warden started"
        );

        Ok(Warden {
            hasher: config_bridge::to_fingerprint_hasher(&cfg),
            engine,
            reputation,
            ledger,
            sink,
            verifier,
            purger,
            verify_limit,
            retention_days: cfg.retention.days,
            cancel,
            tasks: Mutex::new(tasks),
            durable,
        })
    }
}

fn needs_durable(cfg: &Config) -> bool {
    cfg.ledger.storage == StorageBackend::Durable
        || cfg.ledger.queue_mode == QueueMode::Spooled
        || cfg.reputation.backend == StorageBackend::Durable
}

fn open_durable(cfg: &Config) -> WardenResult<Option<Arc<SurrealKvStore>>> {
    if !needs_durable(cfg) {
        return Ok(None);
    }
    let dir = cfg
        .ledger
        .data_dir
        .as_deref()
        .ok_or_else(|| WardenError::Config("ledger.data_dir is required for durable storage".into()))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| WardenError::Persistence(format!("cannot create {dir}: {e}")))?;
    let store = SurrealKvStore::open(Path::new(dir))?;
    Ok(Some(Arc::new(store)))
}

fn durable_kv(durable: Option<&Arc<SurrealKvStore>>) -> WardenResult<Arc<dyn KvStore>> {
    durable
        .map(|store| Arc::clone(store) as Arc<dyn KvStore>)
        .ok_or_else(|| WardenError::Config("durable store is not open".into()))
}

fn spawn_expiry_purge(
    backend: Arc<KvReputationBackend>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match backend.purge_expired().await {
                    Ok(0) => {},
                    Ok(removed) => debug!(removed, "purged expired reputation entries"),
                    Err(e) => warn!(error = %e, "reputation expiry purge failed"),
                },
            }
        }
        info!("reputation expiry purge stopped");
    })
}

fn spawn_periodic_verify(
    verifier: Arc<ChainVerifier>,
    interval: Duration,
    limit: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match verifier.verify_chain(limit).await {
                    Ok(v) if v.valid => {
                        debug!(
                            records = v.records_checked,
                            through = v.verified_through,
                            "periodic chain verification passed"
                        );
                    },
                    Ok(v) => error!(seq = ?v.broken_at_seq, "periodic chain verification failed"),
                    Err(e) => warn!(error = %e, "periodic chain verification could not run"),
                },
            }
        }
        info!("periodic chain verification stopped");
    })
}

/// Ledger, reputation and abuse scoring behind one handle.
pub struct Warden {
    hasher: FingerprintHasher,
    engine: AbuseEngine,
    reputation: IpReputationStore,
    ledger: Ledger,
    sink: Arc<dyn AuditSink>,
    verifier: Arc<ChainVerifier>,
    purger: RetentionPurger,
    verify_limit: usize,
    retention_days: u32,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    durable: Option<Arc<SurrealKvStore>>,
}

impl fmt::Debug for Warden {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warden")
            .field("engine", &self.engine)
            .field("durable", &self.durable.is_some())
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

impl Warden {
    /// Start a builder from `config`.
    #[must_use]
    pub fn builder(config: Config) -> WardenBuilder {
        WardenBuilder::new(config)
    }

    /// Build from `config` with no overrides.
    ///
    /// # Errors
    ///
    /// See [`WardenBuilder::build`].
    pub async fn from_config(config: &Config) -> WardenResult<Self> {
        WardenBuilder::new(config.clone()).build().await
    }

    /// Hash raw attempt input without scoring it.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Validation`] for a malformed IP.
    pub fn fingerprint(
        &self,
        input: &FingerprintInput,
        event_type: EventType,
    ) -> WardenResult<Fingerprint> {
        Ok(Fingerprint::from_input(input, event_type, &self.hasher)?)
    }

    /// Gate a trial or invite attempt.
    ///
    /// An IP that is already blocked is rejected before scoring. Otherwise
    /// the attempt is scored and the decision enforced; a rejection has
    /// already blocked the IP and been audited by the time it is returned.
    ///
    /// # Errors
    ///
    /// - [`WardenError::Validation`] for malformed input
    /// - [`WardenError::PolicyRejection`] when the attempt is denied
    /// - [`WardenError::Persistence`] if the reputation store or corpus fails
    pub async fn gate_attempt(
        &self,
        input: &FingerprintInput,
        event_type: EventType,
    ) -> WardenResult<GateOutcome> {
        let fingerprint = self.fingerprint(input, event_type)?;

        let status = self.reputation.is_blocked(fingerprint.ip()).await?;
        if status.blocked {
            debug!(
                ip_hash = %fingerprint.ip_hash.short(),
                permanent = status.permanent,
                "attempt from blocked ip rejected"
            );
            return Err(WardenError::PolicyRejection {
                reason: blocked_reason(&status),
                detection: None,
            });
        }

        let detection = self.engine.detect(&fingerprint).await?;
        Ok(GateOutcome {
            fingerprint,
            detection,
        })
    }

    /// Record that `user_id` completed a gated attempt.
    ///
    /// Returns whether the fingerprint joined the match corpus; soft-flagged
    /// attempts are audited but not added.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Validation`] for an empty user id, or
    /// [`WardenError::Persistence`] if the corpus insert fails.
    pub async fn record_usage(&self, user_id: &str, outcome: &GateOutcome) -> WardenResult<bool> {
        Ok(self
            .engine
            .log_usage(user_id, &outcome.fingerprint, &outcome.detection)
            .await?)
    }

    /// Append an event to the audit ledger.
    ///
    /// Never fails the caller: persistence problems are logged and counted
    /// in [`writer_stats`](Self::writer_stats).
    pub async fn record_event(&self, record: NewAuditRecord) {
        self.sink.record(record).await;
    }

    /// Verify the chain from its anchor, up to the configured batch limit.
    ///
    /// A broken chain is reported in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Persistence`] if the ledger cannot be read.
    pub async fn verify_chain(&self) -> WardenResult<ChainVerification> {
        self.verify_chain_limit(self.verify_limit).await
    }

    /// Verify at most `limit` records from the anchor.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Persistence`] if the ledger cannot be read.
    pub async fn verify_chain_limit(&self, limit: usize) -> WardenResult<ChainVerification> {
        Ok(self.verifier.verify_chain(limit).await?)
    }

    /// Purge ledger and fingerprint records older than `retention_days`.
    ///
    /// The ledger prefix is verified before anything is deleted. Fingerprint
    /// records are purged with the ledger's cutoff only after the ledger
    /// purge succeeds.
    ///
    /// # Errors
    ///
    /// - [`WardenError::Unauthorized`] unless `actor` is privileged
    /// - [`WardenError::Validation`] if `retention_days` is zero
    /// - [`WardenError::Integrity`] if the prefix fails verification
    /// - [`WardenError::PurgeIncomplete`] on a partial ledger purge
    pub async fn purge(&self, retention_days: u32, actor: &Actor) -> WardenResult<RetentionReport> {
        let ledger = self.purger.purge(retention_days, actor).await?;
        let fingerprints = self.engine.purge_older_than(ledger.cutoff).await?;
        info!(%actor, fingerprints, "fingerprint retention purge complete");
        Ok(RetentionReport {
            ledger,
            fingerprints,
        })
    }

    /// [`purge`](Self::purge) with the configured retention window.
    ///
    /// # Errors
    ///
    /// See [`purge`](Self::purge).
    pub async fn purge_expired(&self, actor: &Actor) -> WardenResult<RetentionReport> {
        self.purge(self.retention_days, actor).await
    }

    /// Permanently block `ip`. Privileged actors only.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unauthorized`] for an unprivileged actor, or
    /// [`WardenError::Persistence`] if the reputation store fails.
    pub async fn block_permanent(
        &self,
        actor: &Actor,
        ip: IpAddr,
        reason: &str,
    ) -> WardenResult<BlockEntry> {
        authorize(actor, "block an ip permanently")?;
        let entry = self.reputation.block_permanent(ip, reason).await?;
        warn!(%actor, %ip, reason, "ip permanently blocked by operator");
        self.audit_override(actor, ip, json!({ "operation": "block_permanent", "reason": reason }))
            .await;
        Ok(entry)
    }

    /// Remove every block on `ip`. Privileged actors only.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Unauthorized`] for an unprivileged actor, or
    /// [`WardenError::Persistence`] if the reputation store fails.
    pub async fn unblock(&self, actor: &Actor, ip: IpAddr) -> WardenResult<bool> {
        authorize(actor, "unblock an ip")?;
        let removed = self.reputation.unblock(ip).await?;
        info!(%actor, %ip, removed, "ip unblocked by operator");
        self.audit_override(actor, ip, json!({ "operation": "unblock", "removed": removed }))
            .await;
        Ok(removed)
    }

    /// Current block state of `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Persistence`] if the reputation store fails.
    pub async fn block_status(&self, ip: IpAddr) -> WardenResult<BlockStatus> {
        Ok(self.reputation.is_blocked(ip).await?)
    }

    /// Wait until every event recorded so far has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Persistence`] if the writer has stopped.
    pub async fn flush(&self) -> WardenResult<()> {
        Ok(self.ledger.flush().await?)
    }

    /// Ledger writer counters.
    #[must_use]
    pub fn writer_stats(&self) -> WriterStats {
        self.ledger.stats()
    }

    /// The active scoring policy.
    #[must_use]
    pub fn policy(&self) -> &ScoringPolicy {
        self.engine.policy()
    }

    /// The reputation store.
    #[must_use]
    pub fn reputation(&self) -> &IpReputationStore {
        &self.reputation
    }

    /// Stop background tasks, drain the ledger writer and close the durable
    /// store.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Persistence`] if the durable store fails to
    /// close cleanly.
    pub async fn shutdown(&self) -> WardenResult<()> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.ledger.shutdown().await;
        if let Some(store) = &self.durable {
            store.close().await?;
        }
        info!(stats = ?self.ledger.stats(), "warden stopped");
        Ok(())
    }

    async fn audit_override(&self, actor: &Actor, ip: IpAddr, detail: serde_json::Value) {
        self.sink
            .record(
                NewAuditRecord::new(actor.clone(), ActionKind::AdminOverride)
                    .with_entity(format!("ip_hash:{}", self.hasher.hash_ip(ip).to_hex()))
                    .with_detail(detail),
            )
            .await;
    }
}

fn authorize(actor: &Actor, operation: &str) -> WardenResult<()> {
    if actor.is_privileged() {
        return Ok(());
    }
    warn!(%actor, operation, "unprivileged admin operation rejected");
    Err(WardenError::Unauthorized {
        actor: actor.to_string(),
        operation: operation.to_owned(),
    })
}

fn blocked_reason(status: &BlockStatus) -> String {
    match (status.permanent, status.expires_at) {
        (true, _) => "ip is permanently blocked".to_owned(),
        (false, Some(until)) => format!("ip is blocked until {}", until.to_rfc3339()),
        (false, None) => "ip is blocked".to_owned(),
    }
}
