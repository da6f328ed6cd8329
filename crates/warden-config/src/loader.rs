//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/warden/config.toml` (system)
//! 3. Merge `~/.warden/config.toml` (user)
//! 4. Merge the explicitly requested file, if any
//! 5. Apply `WARDEN_*` env var fallbacks for fields no file set
//! 6. Deserialize the merged tree → `Config`
//! 7. Validate

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus where its values came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Layer that set each leaf field, keyed by dotted path.
    pub field_sources: FieldSources,
    /// Config files that were found and merged, in merge order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Layer that set `field` (dotted path), if known.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<&ConfigLayer> {
        self.field_sources.get(field)
    }
}

/// Where to look for config files.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions<'a> {
    /// File merged on top of the system and user layers.
    pub explicit: Option<&'a Path>,
    /// Directory holding the user `config.toml`, replacing `~/.warden`.
    pub user_dir: Option<&'a Path>,
    /// Skip `/etc/warden/config.toml`.
    pub skip_system: bool,
}

/// Load the configuration with layered file precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(options: &LoadOptions<'_>) -> ConfigResult<ResolvedConfig> {
    load_with_env(options, &collect_env_vars())
}

/// [`load`] with an explicit environment map.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    options: &LoadOptions<'_>,
    env_vars: &std::collections::HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    // 2-4. File layers, lowest precedence first.
    let mut layers: Vec<(PathBuf, ConfigLayer)> = Vec::new();
    if !options.skip_system {
        layers.push((PathBuf::from("/etc/warden/config.toml"), ConfigLayer::System));
    }
    let user_dir = match options.user_dir {
        Some(dir) => dir.to_path_buf(),
        None => home_directory()?.join(".warden"),
    };
    layers.push((user_dir.join("config.toml"), ConfigLayer::User));

    for (path, layer) in layers {
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
            info!(path = %path.display(), layer = %layer, "loaded config");
            loaded_files.push(path.display().to_string());
        }
    }

    if let Some(path) = options.explicit {
        // An explicitly named file must exist.
        let overlay = read_file(path)?;
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::Explicit,
            &mut field_sources,
        );
        info!(path = %path.display(), "loaded explicit config");
        loaded_files.push(path.display().to_string());
    }

    // 5. Env var fallbacks.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    // 6. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 7. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a specific file path (no layering, no env fallbacks).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = read_file(path)?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Read and parse a file that must exist.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_content(path, &content)
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation to avoid TOCTOU races (no separate
/// exists/metadata checks before reading).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };
    parse_content(path, &content).map(Some)
}

fn parse_content(path: &Path, content: &str) -> ConfigResult<toml::Value> {
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueueMode, StorageBackend};
    use std::collections::HashMap;

    fn isolated(dir: &Path) -> LoadOptions<'_> {
        LoadOptions {
            explicit: None,
            user_dir: Some(dir),
            skip_system: true,
        }
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config.ledger.queue_capacity, 10_000);
        assert_eq!(config.scoring.weights.device, 40);
        assert_eq!(config.scoring.thresholds.high, 60);
        assert_eq!(config.retention.days, 365);
        assert!(config.fingerprint.pepper.is_none());
    }

    #[test]
    fn test_defaults_match_default_impls() {
        let from_toml: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        let from_impl = Config::default();
        assert_eq!(
            serde_json::to_value(&from_toml).unwrap(),
            serde_json::to_value(&from_impl).unwrap()
        );
    }

    #[test]
    fn test_load_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_with_env(&isolated(dir.path()), &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.source_of("ledger.digest"), Some(&ConfigLayer::Defaults));
    }

    #[test]
    fn test_user_then_explicit_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[scoring]\nlookback_days = 14\n[retention]\ndays = 90\n",
        )
        .unwrap();
        let explicit = dir.path().join("override.toml");
        std::fs::write(&explicit, "[retention]\ndays = 30\n").unwrap();

        let options = LoadOptions {
            explicit: Some(explicit.as_path()),
            ..isolated(dir.path())
        };
        let resolved = load_with_env(&options, &HashMap::new()).unwrap();
        assert_eq!(resolved.config.scoring.lookback_days, 14);
        assert_eq!(resolved.config.retention.days, 30);
        assert_eq!(resolved.source_of("retention.days"), Some(&ConfigLayer::Explicit));
        assert_eq!(resolved.source_of("scoring.lookback_days"), Some(&ConfigLayer::User));
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_env_fallback_applies_only_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let env: HashMap<String, String> = [
            ("WARDEN_LOG_LEVEL", "debug"),
            ("WARDEN_REPUTATION_BACKEND", "durable"),
            ("WARDEN_DATA_DIR", "/var/lib/warden"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let resolved = load_with_env(&isolated(dir.path()), &env).unwrap();
        assert_eq!(resolved.config.logging.level, "warn");
        assert_eq!(resolved.config.reputation.backend, StorageBackend::Durable);
        assert_eq!(resolved.config.ledger.data_dir.as_deref(), Some("/var/lib/warden"));
    }

    #[test]
    fn test_merged_config_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[ledger]\nqueue_mode = \"spooled\"\n",
        )
        .unwrap();
        let result = load_with_env(&isolated(dir.path()), &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            "[ledger]\nqueue_mode = \"spooled\"\ndata_dir = \"/srv/warden\"\n",
        )
        .unwrap();
        let config = load_file(&path).unwrap();
        assert_eq!(config.ledger.queue_mode, QueueMode::Spooled);
        assert_eq!(config.ledger.queue_capacity, 10_000);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let options = LoadOptions {
            explicit: Some(missing.as_path()),
            ..isolated(dir.path())
        };
        assert!(matches!(
            load_with_env(&options, &HashMap::new()),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[reputation]\nbackend = \"redis\"\n",
        )
        .unwrap();
        assert!(matches!(
            load_with_env(&isolated(dir.path()), &HashMap::new()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_pepper_never_serialized() {
        let mut config = Config::default();
        config.fingerprint.pepper = Some("top-secret-pepper".to_owned());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("top-secret-pepper"));
        assert!(!format!("{config:?}").contains("top-secret-pepper"));
    }
}
