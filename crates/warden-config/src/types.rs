//! Configuration types for Warden.
//!
//! All types in this module are self-contained with no dependencies on other
//! internal warden crates. Conversion into domain types happens in the
//! runtime. Every struct implements [`Default`] with the same values as the
//! embedded `defaults.toml`, so a bare `[section]` header produces a working
//! configuration.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audit ledger persistence, queueing and verification.
    pub ledger: LedgerSection,
    /// IP reputation backend and block TTLs.
    pub reputation: ReputationSection,
    /// Abuse scoring weights, thresholds and lookback window.
    pub scoring: ScoringSection,
    /// Retention window for ledger and fingerprint records.
    pub retention: RetentionSection,
    /// Fingerprint hashing secret.
    pub fingerprint: FingerprintSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

/// Where a component keeps its state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process, lost on restart.
    #[default]
    Memory,
    /// On-disk key-value store under `ledger.data_dir`.
    Durable,
}

/// How the ledger writer queues records before the consumer persists them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Bounded in-memory channel. Records queued at crash time are lost.
    #[default]
    Volatile,
    /// Records are spooled to the durable store first and replayed on start.
    Spooled,
}

// ---------------------------------------------------------------------------
// LedgerSection
// ---------------------------------------------------------------------------

/// Audit ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Ledger record storage.
    pub storage: StorageBackend,
    /// Directory of the durable store, shared by every durable component.
    pub data_dir: Option<String>,
    /// Writer queue variant.
    pub queue_mode: QueueMode,
    /// Capacity of the volatile queue. Records beyond it are dropped.
    pub queue_capacity: usize,
    /// Chain digest: `"sha256"` or `"blake3"`. Pinned for the chain's life.
    pub digest: String,
    /// Seconds between background verification passes. `0` disables them.
    pub verify_interval_secs: u64,
    /// Maximum records checked per verification pass.
    pub verify_batch_limit: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            data_dir: None,
            queue_mode: QueueMode::Volatile,
            queue_capacity: 10_000,
            digest: "sha256".to_owned(),
            verify_interval_secs: 0,
            verify_batch_limit: 100_000,
        }
    }
}

// ---------------------------------------------------------------------------
// ReputationSection
// ---------------------------------------------------------------------------

/// IP reputation store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationSection {
    /// Backend chosen once at startup.
    pub backend: StorageBackend,
    /// Seconds between expiry sweeps of the in-memory backend.
    pub sweep_interval_secs: u64,
    /// TTL of temporary blocks that do not name one.
    pub default_ttl_secs: u64,
}

impl Default for ReputationSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sweep_interval_secs: 60,
            default_ttl_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// ScoringSection
// ---------------------------------------------------------------------------

/// Abuse scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    /// Days of fingerprint history consulted when scoring.
    pub lookback_days: u32,
    /// TTL of blocks imposed by a high or critical score.
    pub temp_block_ttl_secs: u64,
    /// Points per matching signal.
    pub weights: WeightsSection,
    /// Severity thresholds.
    pub thresholds: ThresholdsSection,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            temp_block_ttl_secs: 86_400,
            weights: WeightsSection::default(),
            thresholds: ThresholdsSection::default(),
        }
    }
}

/// Points each matching signal contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsSection {
    /// Device id.
    pub device: u32,
    /// IP address.
    pub ip: u32,
    /// User-Agent.
    pub user_agent: u32,
    /// Email domain.
    pub email_domain: u32,
    /// Institution.
    pub institution: u32,
}

impl Default for WeightsSection {
    fn default() -> Self {
        Self {
            device: 40,
            ip: 25,
            user_agent: 10,
            email_domain: 10,
            institution: 8,
        }
    }
}

/// Minimum score of each severity above low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsSection {
    /// Medium severity.
    pub medium: u32,
    /// High severity (temporary block).
    pub high: u32,
    /// Critical severity (escalation).
    pub critical: u32,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            medium: 30,
            high: 60,
            critical: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// RetentionSection
// ---------------------------------------------------------------------------

/// Retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Records older than this many days are eligible for purge.
    pub days: u32,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self { days: 365 }
    }
}

// ---------------------------------------------------------------------------
// FingerprintSection
// ---------------------------------------------------------------------------

/// Fingerprint hashing configuration.
///
/// `Debug` and `Serialize` never reveal the pepper.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    /// Secret mixed into every fingerprint digest. Prefer
    /// `WARDEN_FINGERPRINT_PEPPER` over storing it in a file.
    pub pepper: Option<String>,
}

impl std::fmt::Debug for FingerprintSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintSection")
            .field("has_pepper", &self.pepper.is_some())
            .finish()
    }
}

impl Serialize for FingerprintSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FingerprintSection", 1)?;
        state.serialize_field("has_pepper", &self.pepper.is_some())?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["warden_audit=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
