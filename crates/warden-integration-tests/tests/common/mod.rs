//! Shared test harness for integration tests.

use std::sync::Arc;

use warden_abuse::{EventType, FingerprintInput, FingerprintStore, MemoryFingerprintStore};
use warden_audit::{AuditRecord, LedgerStore, MemoryLedgerStore};
use warden_config::Config;
use warden_crypto::{ContentHash, Digest};
use warden_runtime::Warden;
use warden_test::RecordingAlertDispatcher;

/// A warden over in-memory stores the test can reach into.
#[allow(dead_code)]
pub struct Harness {
    /// The warden under test.
    pub warden: Warden,
    /// The ledger store behind the writer.
    pub ledger: Arc<MemoryLedgerStore>,
    /// The fingerprint corpus behind the engine.
    pub corpus: Arc<MemoryFingerprintStore>,
    /// Every alert dispatched.
    pub alerts: Arc<RecordingAlertDispatcher>,
}

#[allow(dead_code)]
impl Harness {
    /// Build with `config`.
    pub async fn new(config: Config) -> Self {
        warden_test::fixtures::init_test_logging();
        let ledger = Arc::new(MemoryLedgerStore::new());
        let corpus = Arc::new(MemoryFingerprintStore::new());
        let alerts = Arc::new(RecordingAlertDispatcher::new());
        let warden = Warden::builder(config)
            .ledger_store(ledger.clone())
            .fingerprint_store(corpus.clone())
            .alerts(alerts.clone())
            .build()
            .await
            .unwrap();
        Self {
            warden,
            ledger,
            corpus,
            alerts,
        }
    }

    /// Build with default configuration.
    pub async fn default_config() -> Self {
        Self::new(Config::default()).await
    }

    /// Put a prior attempt straight into the corpus, bypassing scoring.
    pub async fn seed(&self, user_id: &str, input: &FingerprintInput) {
        let fp = self
            .warden
            .fingerprint(input, EventType::TrialUsage)
            .unwrap();
        self.corpus
            .insert(fp.to_record(user_id, chrono::Utc::now()))
            .await
            .unwrap();
    }

    /// Every persisted ledger record, in sequence order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.warden.flush().await.unwrap();
        self.ledger.read_range(0, usize::MAX).await.unwrap()
    }
}

/// Recompute a chain from genesis, independent of the verifier.
#[allow(dead_code)]
pub fn recompute_tail(records: &[AuditRecord], digest: &dyn Digest) -> ContentHash {
    records.iter().fold(ContentHash::zero(), |prev, record| {
        record.compute_chain_hash(&prev, digest)
    })
}
