//! Engine configuration via `redmap.toml`
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the stock configuration: default id generator, process cache disabled.

use redmap_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "redmap.toml";

/// Id generator used when a schema names none.
pub const DEFAULT_GENERATOR: &str = "default";

fn default_generator() -> String {
    DEFAULT_GENERATOR.to_string()
}

fn default_times_cache_clear() -> u64 {
    15_000
}

fn default_retain() -> usize {
    150_000
}

/// Process cache settings, the `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cacheable records enter the process cache.
    #[serde(default)]
    pub enabled: bool,
    /// Drain reclaimed entries every this many puts.
    #[serde(default = "default_times_cache_clear")]
    pub times_cache_clear: u64,
    /// Number of most recent puts held strongly by the cache.
    #[serde(default = "default_retain")]
    pub retain: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            times_cache_clear: default_times_cache_clear(),
            retain: default_retain(),
        }
    }
}

/// Engine configuration loaded from `redmap.toml`.
///
/// # Example
///
/// ```toml
/// default_generator = "default"
///
/// [cache]
/// enabled = true
/// times_cache_clear = 15000
/// retain = 150000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Id generator for auto-id schemas that do not name one.
    #[serde(default = "default_generator")]
    pub default_generator: String,
    /// Process cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_generator: default_generator(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `times_cache_clear` is zero or the default
    /// generator name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.cache.times_cache_clear == 0 {
            return Err(Error::Config(
                "cache.times_cache_clear must be at least 1".to_string(),
            ));
        }
        if self.default_generator.trim().is_empty() {
            return Err(Error::Config(
                "default_generator must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# redmap engine configuration
#
# Id generator used by auto-id schemas that do not name one.
#   "default" = per-table counter in the store (INCR table:__id__)
#   "uuid"    = random v4 uuid
default_generator = "default"

[cache]
# Keep saved and loaded records in the process cache (default: false)
enabled = false
# Drain reclaimed entries every N puts
times_cache_clear = 15000
# Most recent puts held strongly; older entries become reclaimable
retain = 150000
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_disables_cache() {
        let config = EngineConfig::default();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.times_cache_clear, 15_000);
        assert_eq!(config.cache.retain, 150_000);
        assert_eq!(config.default_generator, "default");
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config = EngineConfig::from_toml_str(EngineConfig::default_toml()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_cache_section() {
        let config = EngineConfig::from_toml_str("[cache]\nenabled = true\n").unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.times_cache_clear, 15_000);
    }

    #[test]
    fn zero_drain_interval_is_rejected() {
        let err = EngineConfig::from_toml_str("[cache]\ntimes_cache_clear = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("cache = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = EngineConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = EngineConfig {
            default_generator: "uuid".to_string(),
            cache: CacheConfig {
                enabled: true,
                times_cache_clear: 10,
                retain: 4,
            },
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }
}
