//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only apply to fields that
//! no config file set. Embedded defaults do not count as set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `WARDEN_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "WARDEN_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "WARDEN_LOG_FORMAT",
        field_path: "logging.format",
    },
    EnvMapping {
        var_name: "WARDEN_LEDGER_STORAGE",
        field_path: "ledger.storage",
    },
    EnvMapping {
        var_name: "WARDEN_DATA_DIR",
        field_path: "ledger.data_dir",
    },
    EnvMapping {
        var_name: "WARDEN_REPUTATION_BACKEND",
        field_path: "reputation.backend",
    },
    EnvMapping {
        var_name: "WARDEN_RETENTION_DAYS",
        field_path: "retention.days",
    },
    EnvMapping {
        var_name: "WARDEN_FINGERPRINT_PEPPER",
        field_path: "fingerprint.pepper",
    },
];

fn set_by_file(sources: &FieldSources, path: &str) -> bool {
    sources
        .get(path)
        .is_some_and(|layer| !matches!(layer, ConfigLayer::Defaults))
}

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if set_by_file(sources, mapping.field_path) {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );
            if set_field_from_string(merged, mapping.field_path, val) {
                sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
                count = count.saturating_add(1);
            }
        }
    }

    count
}

/// Set a dotted-path field from a string, creating intermediate tables.
/// Returns `false` if a non-table value sits on the path.
fn set_field_from_string(root: &mut toml::Value, path: &str, val: &str) -> bool {
    let toml_val = coerce_to_toml_value(path, val);
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        return root
            .as_table_mut()
            .map(|t| t.insert(path.to_owned(), toml_val))
            .is_some();
    };

    let mut current = root;
    for segment in parents.split('.') {
        let Some(table) = current.as_table_mut() else {
            return false;
        };
        current = table
            .entry(segment)
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
    match current.as_table_mut() {
        Some(table) => {
            table.insert(leaf.to_owned(), toml_val);
            true
        },
        None => false,
    }
}

/// Coerce a string env var value to the TOML type of the target field.
fn coerce_to_toml_value(path: &str, val: &str) -> toml::Value {
    if path == "retention.days" {
        if let Ok(i) = val.parse::<i64>() {
            return toml::Value::Integer(i);
        }
    }
    toml::Value::String(val.to_owned())
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_env_fallback_over_defaults() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"info\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::Defaults);
        let env = make_env(&[("WARDEN_LOG_LEVEL", "debug")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 1);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(sources.get("logging.level"), Some(&ConfigLayer::Environment));
    }

    #[test]
    fn test_env_fallback_skips_file_values() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::User);
        let env = make_env(&[("WARDEN_LOG_LEVEL", "debug")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn test_env_creates_missing_tables() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();
        let env = make_env(&[
            ("WARDEN_FINGERPRINT_PEPPER", "s3cret"),
            ("WARDEN_RETENTION_DAYS", "90"),
        ]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 2);
        assert_eq!(merged["fingerprint"]["pepper"].as_str(), Some("s3cret"));
        assert_eq!(merged["retention"]["days"].as_integer(), Some(90));
    }

    #[test]
    fn test_non_table_on_path_is_skipped() {
        let mut merged: toml::Value = toml::from_str("ledger = 5").unwrap();
        assert!(!set_field_from_string(&mut merged, "ledger.data_dir", "/tmp"));
    }
}
