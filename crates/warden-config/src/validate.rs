//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, QueueMode, StorageBackend};

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_ledger(config)?;
    validate_reputation(config)?;
    validate_scoring(config)?;
    validate_retention(config)?;
    validate_fingerprint(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn uses_durable_store(config: &Config) -> bool {
    config.ledger.storage == StorageBackend::Durable
        || config.ledger.queue_mode == QueueMode::Spooled
        || config.reputation.backend == StorageBackend::Durable
}

fn validate_ledger(config: &Config) -> ConfigResult<()> {
    let l = &config.ledger;

    if l.queue_capacity == 0 {
        return Err(invalid("ledger.queue_capacity", "must be at least 1"));
    }

    if !matches!(l.digest.as_str(), "sha256" | "blake3") {
        return Err(invalid(
            "ledger.digest",
            format!("unsupported digest '{}'; expected one of: sha256, blake3", l.digest),
        ));
    }

    if l.verify_batch_limit == 0 {
        return Err(invalid("ledger.verify_batch_limit", "must be at least 1"));
    }

    if uses_durable_store(config)
        && l.data_dir.as_deref().is_none_or(|d| d.trim().is_empty())
    {
        return Err(invalid(
            "ledger.data_dir",
            "a data directory is required when any component uses durable storage \
             or the spooled queue",
        ));
    }

    Ok(())
}

fn validate_reputation(config: &Config) -> ConfigResult<()> {
    let r = &config.reputation;
    if r.default_ttl_secs == 0 {
        return Err(invalid("reputation.default_ttl_secs", "must be at least 1"));
    }
    if r.sweep_interval_secs == 0 {
        return Err(invalid("reputation.sweep_interval_secs", "must be at least 1"));
    }
    Ok(())
}

fn validate_scoring(config: &Config) -> ConfigResult<()> {
    let s = &config.scoring;

    if s.lookback_days == 0 {
        return Err(invalid("scoring.lookback_days", "must be at least 1"));
    }
    if s.temp_block_ttl_secs == 0 {
        return Err(invalid("scoring.temp_block_ttl_secs", "must be at least 1"));
    }

    let t = &s.thresholds;
    if t.medium == 0 {
        return Err(invalid("scoring.thresholds.medium", "must be at least 1"));
    }
    if !(t.medium < t.high && t.high < t.critical) {
        return Err(invalid(
            "scoring.thresholds",
            format!(
                "thresholds must be strictly ascending (medium {} < high {} < critical {})",
                t.medium, t.high, t.critical
            ),
        ));
    }

    let w = &s.weights;
    if !(w.device > w.ip && w.ip > w.email_domain && w.ip > w.institution) {
        return Err(invalid(
            "scoring.weights",
            format!(
                "weights must rank device ({}) > ip ({}) > email_domain ({}) \
                 and ip > institution ({})",
                w.device, w.ip, w.email_domain, w.institution
            ),
        ));
    }

    Ok(())
}

fn validate_retention(config: &Config) -> ConfigResult<()> {
    if config.retention.days == 0 {
        return Err(invalid("retention.days", "must be at least 1"));
    }
    Ok(())
}

fn validate_fingerprint(config: &Config) -> ConfigResult<()> {
    if let Some(pepper) = &config.fingerprint.pepper {
        if pepper.is_empty() {
            return Err(invalid(
                "fingerprint.pepper",
                "must not be empty; omit it to hash without a secret",
            ));
        }
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let lg = &config.logging;
    if !matches!(
        lg.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error",
                lg.level
            ),
        ));
    }
    if !matches!(lg.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                lg.format
            ),
        ));
    }
    Ok(())
}
