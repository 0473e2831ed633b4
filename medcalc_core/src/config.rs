//! Configuration file support for medcalc.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medcalc/config.toml`.

use crate::locale::Locale;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Module cache policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// TTL as a chrono duration, saturating at `Duration::MAX`
    pub fn max_age(&self) -> chrono::Duration {
        i64::try_from(self.max_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Performance monitor retention and warning thresholds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_max_measurements")]
    pub max_measurements: usize,

    #[serde(default = "default_max_average_load_ms")]
    pub max_average_load_ms: f64,

    #[serde(default = "default_min_cache_hit_rate")]
    pub min_cache_hit_rate: f64,

    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_measurements: default_max_measurements(),
            max_average_load_ms: default_max_average_load_ms(),
            min_cache_hit_rate: default_min_cache_hit_rate(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

/// Capabilities of the environment hosting the calculators
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Whether dashboards can be rendered
    #[serde(default)]
    pub ui_available: bool,

    #[serde(default)]
    pub default_locale: Locale,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ui_available: false,
            default_locale: Locale::DEFAULT,
        }
    }
}

/// Largest TTL representable as a chrono duration
const MAX_AGE_SECS_LIMIT: u64 = (i64::MAX / 1000) as u64;

// Default value functions
fn default_max_entries() -> usize {
    10
}

fn default_max_age_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_max_measurements() -> usize {
    100
}

fn default_max_average_load_ms() -> f64 {
    100.0
}

fn default_min_cache_hit_rate() -> f64 {
    0.5
}

fn default_max_memory_bytes() -> usize {
    5 * 1024 * 1024
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(config_path) if config_path.exists() => Self::load_from(&config_path),
            path => {
                tracing::info!("No config file found at {:?}, using defaults", path);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.check()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join("medcalc").join("config.toml"))
    }

    /// Reject values that cannot describe a working runtime
    pub fn check(&self) -> Result<()> {
        if self.cache.max_age_secs > MAX_AGE_SECS_LIMIT {
            return Err(Error::Config(format!(
                "cache.max_age_secs must be <= {}",
                MAX_AGE_SECS_LIMIT
            )));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(Error::Config("cache.sweep_interval_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.monitor.min_cache_hit_rate) {
            return Err(Error::Config(
                "monitor.min_cache_hit_rate must be between 0 and 1".into(),
            ));
        }
        if self.monitor.max_measurements == 0 {
            return Err(Error::Config("monitor.max_measurements must be > 0".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.max_age(), chrono::Duration::minutes(30));
        assert_eq!(config.cache.sweep_interval(), std::time::Duration::from_secs(300));
        assert_eq!(config.monitor.max_measurements, 100);
        assert_eq!(config.runtime.default_locale, Locale::ZhTw);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.max_entries = 3;
        config.runtime.default_locale = Locale::Ja;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[cache]
max_entries = 2

[runtime]
default_locale = "en"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.max_entries, 2);
        assert_eq!(config.cache.max_age_secs, 1800); // default
        assert_eq!(config.runtime.default_locale, Locale::En);
        assert!(!config.runtime.ui_available);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nmin_cache_hit_rate = 1.5\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_huge_max_age_rejected_and_saturated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nmax_age_secs = 10000000000000000\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_age_secs"));

        let mut config = Config::default();
        config.cache.max_age_secs = u64::MAX;
        assert_eq!(config.cache.max_age(), chrono::Duration::MAX);

        config.cache.max_age_secs = MAX_AGE_SECS_LIMIT;
        assert!(config.check().is_ok());
        assert_eq!(
            config.cache.max_age(),
            chrono::Duration::seconds(MAX_AGE_SECS_LIMIT as i64)
        );
    }
}
