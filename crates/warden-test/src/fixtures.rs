//! Test fixtures for common inputs.

use std::path::Path;

use warden_abuse::FingerprintInput;
use warden_audit::{ActionKind, NewAuditRecord};
use warden_config::{Config, QueueMode, StorageBackend};
use warden_core::{Actor, ActorRole};
use warden_crypto::FingerprintHasher;

/// A platform operator allowed to purge, block and unblock.
#[must_use]
pub fn admin() -> Actor {
    Actor::new("ops-admin", ActorRole::PlatformAdmin)
}

/// An ordinary user.
#[must_use]
pub fn member(id: &str) -> Actor {
    Actor::new(id, ActorRole::Member)
}

/// Attempt input carrying only an IP and a device id.
#[must_use]
pub fn attempt(ip: &str, device: &str) -> FingerprintInput {
    FingerprintInput::new(ip).device_id(device)
}

/// Attempt input carrying every signal.
#[must_use]
pub fn full_attempt(ip: &str, device: &str, email: &str) -> FingerprintInput {
    FingerprintInput::new(ip)
        .device_id(device)
        .email(email)
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
        .institution("inst-001")
}

/// A login event for `user`.
#[must_use]
pub fn login_record(user: &str) -> NewAuditRecord {
    NewAuditRecord::new(member(user), ActionKind::Login)
        .with_entity(format!("user:{user}"))
}

/// A data-mutation event with a small detail payload.
#[must_use]
pub fn mutation_record(user: &str, entity: &str) -> NewAuditRecord {
    NewAuditRecord::new(member(user), ActionKind::DataMutation)
        .with_entity(entity)
        .with_detail(serde_json::json!({ "op": "update" }))
}

/// Fingerprint hasher with a fixed test pepper.
#[must_use]
pub fn hasher() -> FingerprintHasher {
    FingerprintHasher::with_pepper(b"warden-test-pepper")
}

/// In-memory configuration with every background task at defaults.
#[must_use]
pub fn memory_config() -> Config {
    Config::default()
}

/// Configuration where a single prior device match stays below the
/// soft-flag threshold, so two corpus entries are needed to block.
#[must_use]
pub fn lenient_config() -> Config {
    let mut cfg = Config::default();
    cfg.scoring.thresholds.medium = 50;
    cfg
}

/// Configuration with every component on the durable store under `dir`.
#[must_use]
pub fn durable_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.ledger.storage = StorageBackend::Durable;
    cfg.ledger.queue_mode = QueueMode::Spooled;
    cfg.reputation.backend = StorageBackend::Durable;
    cfg.ledger.data_dir = Some(dir.to_string_lossy().into_owned());
    cfg
}

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
