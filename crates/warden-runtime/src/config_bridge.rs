//! Bridge from `warden_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates its plain sections into the policy, hasher, digest and
//! logging types the components take, so that conversion happens once, in
//! one place.

use std::time::Duration;

use warden_abuse::{ScoringPolicy, SeverityThresholds, SignalWeights};
use warden_config::Config;
use warden_crypto::{DigestAlgorithm, FingerprintHasher};
use warden_telemetry::LogConfig;

use crate::error::{WardenError, WardenResult};

const SECS_PER_DAY: u64 = 86_400;

/// Convert the `[scoring]` section to a [`ScoringPolicy`].
#[must_use]
pub fn to_scoring_policy(cfg: &Config) -> ScoringPolicy {
    let s = &cfg.scoring;
    ScoringPolicy {
        lookback: Duration::from_secs(u64::from(s.lookback_days).saturating_mul(SECS_PER_DAY)),
        weights: SignalWeights {
            device: s.weights.device,
            ip: s.weights.ip,
            user_agent: s.weights.user_agent,
            email_domain: s.weights.email_domain,
            institution: s.weights.institution,
        },
        thresholds: SeverityThresholds {
            medium: s.thresholds.medium,
            high: s.thresholds.high,
            critical: s.thresholds.critical,
        },
        temp_block_ttl: Duration::from_secs(s.temp_block_ttl_secs),
    }
}

/// Resolve the chain digest named by `ledger.digest`.
///
/// # Errors
///
/// Returns [`WardenError::Config`] for an unknown algorithm name.
pub fn to_digest_algorithm(cfg: &Config) -> WardenResult<DigestAlgorithm> {
    cfg.ledger
        .digest
        .parse()
        .map_err(|e: warden_crypto::CryptoError| WardenError::Config(e.to_string()))
}

/// Build the fingerprint hasher, keyed when a pepper is configured.
#[must_use]
pub fn to_fingerprint_hasher(cfg: &Config) -> FingerprintHasher {
    match cfg.fingerprint.pepper.as_deref() {
        Some(pepper) => FingerprintHasher::with_pepper(pepper.as_bytes()),
        None => FingerprintHasher::unkeyed(),
    }
}

/// TTL applied to temporary blocks that do not name their own.
#[must_use]
pub fn to_default_block_ttl(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.reputation.default_ttl_secs)
}

/// Interval between in-memory reputation sweeps.
#[must_use]
pub fn to_sweep_interval(cfg: &Config) -> Duration {
    Duration::from_secs(cfg.reputation.sweep_interval_secs)
}

/// Interval between background verification passes, if enabled.
#[must_use]
pub fn to_verify_interval(cfg: &Config) -> Option<Duration> {
    match cfg.ledger.verify_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Maximum records checked per verification pass.
#[must_use]
pub fn to_verify_limit(cfg: &Config) -> usize {
    usize::try_from(cfg.ledger.verify_batch_limit).unwrap_or(usize::MAX)
}

/// Convert the `[logging]` section to a [`LogConfig`].
///
/// # Errors
///
/// Returns [`WardenError::Config`] for an unknown log format.
pub fn to_log_config(cfg: &Config) -> WardenResult<LogConfig> {
    Ok(LogConfig::try_from(&cfg.logging)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_telemetry::LogFormat;

    #[test]
    fn test_scoring_policy_from_defaults() {
        let policy = to_scoring_policy(&Config::default());
        assert_eq!(policy, ScoringPolicy::default());
    }

    #[test]
    fn test_scoring_policy_overrides() {
        let mut cfg = Config::default();
        cfg.scoring.lookback_days = 7;
        cfg.scoring.temp_block_ttl_secs = 900;
        cfg.scoring.weights.device = 55;
        cfg.scoring.thresholds.high = 50;

        let policy = to_scoring_policy(&cfg);
        assert_eq!(policy.lookback, Duration::from_secs(604_800));
        assert_eq!(policy.temp_block_ttl, Duration::from_secs(900));
        assert_eq!(policy.weights.device, 55);
        assert_eq!(policy.thresholds.high, 50);
    }

    #[test]
    fn test_digest_algorithm() {
        let mut cfg = Config::default();
        assert_eq!(to_digest_algorithm(&cfg).unwrap(), DigestAlgorithm::Sha256);

        cfg.ledger.digest = "blake3".into();
        assert_eq!(to_digest_algorithm(&cfg).unwrap(), DigestAlgorithm::Blake3);

        cfg.ledger.digest = "md5".into();
        assert!(matches!(to_digest_algorithm(&cfg), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_pepper_changes_digests() {
        let mut cfg = Config::default();
        let unkeyed = to_fingerprint_hasher(&cfg).hash_opt(Some("device-1"));
        cfg.fingerprint.pepper = Some("s3cret".into());
        let keyed = to_fingerprint_hasher(&cfg).hash_opt(Some("device-1"));
        assert_ne!(unkeyed, keyed);
    }

    #[test]
    fn test_intervals() {
        let mut cfg = Config::default();
        assert_eq!(to_verify_interval(&cfg), None);
        cfg.ledger.verify_interval_secs = 30;
        assert_eq!(to_verify_interval(&cfg), Some(Duration::from_secs(30)));
        assert_eq!(to_sweep_interval(&cfg), Duration::from_secs(60));
        assert_eq!(to_default_block_ttl(&cfg), Duration::from_secs(3600));
        assert_eq!(to_verify_limit(&cfg), 100_000);
    }

    #[test]
    fn test_log_config() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["warden_audit=debug".into()];
        let log = to_log_config(&cfg).unwrap();
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives.len(), 1);

        cfg.logging.format = "xml".into();
        assert!(matches!(to_log_config(&cfg), Err(WardenError::Config(_))));
    }
}
