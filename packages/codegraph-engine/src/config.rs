//! Engine configuration (YAML file + environment overrides)
//!
//! ```yaml
//! version: 1
//! timeout_ms: 30000
//! incremental:
//!   enabled: true
//!   state_path: .codegraph/incremental-state.json
//! pool:
//!   enabled: true
//!   max_workers: 8
//!   batch_size: 10
//!   threshold: 100
//!   stack_size_mb: 8
//! metrics:
//!   enabled: true
//!   history_path: .codegraph/metrics-history.json
//!   history_cap: 200
//! ```
//!
//! Every section is optional; missing fields take their defaults. Relative
//! paths are resolved against the run's base directory.

use crate::metrics::DEFAULT_HISTORY_CAP;
use crate::pool::PoolOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Supported configuration file versions
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Prefix of environment overrides (`CODEGRAPH_ENGINE_TIMEOUT_MS`, ...)
pub const ENV_PREFIX: &str = "CODEGRAPH_ENGINE_";

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_POOL_THRESHOLD: usize = 100;
pub const DEFAULT_STACK_SIZE_MB: usize = 8;
const MAX_WORKERS_CAP: usize = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }

    fn invalid_env(var: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Default worker count: logical CPUs, capped at 8
pub fn default_max_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS_CAP)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncrementalConfig {
    pub enabled: bool,
    pub state_path: PathBuf,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_path: PathBuf::from(".codegraph/incremental-state.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub enabled: bool,
    pub max_workers: usize,
    pub batch_size: usize,
    /// Minimum number of files needing execution before the pool engages
    pub threshold: usize,
    /// Worker thread stack size in MB (1..=64)
    pub stack_size_mb: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: default_max_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            threshold: DEFAULT_POOL_THRESHOLD,
            stack_size_mb: DEFAULT_STACK_SIZE_MB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub history_path: PathBuf,
    pub history_cap: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_path: PathBuf::from(".codegraph/metrics-history.json"),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-technique wall-clock budget, 0 disables
    pub timeout_ms: u64,
    pub incremental: IncrementalConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            incremental: IncrementalConfig::default(),
            pool: PoolConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// YAML schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    incremental: Option<IncrementalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pool: Option<PoolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricsConfig>,
}

impl EngineConfig {
    /// Load from a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(v) if !SUPPORTED_VERSIONS.contains(&v) => {
                return Err(ConfigError::UnsupportedVersion {
                    found: v,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        let defaults = Self::default();
        let config = Self {
            timeout_ms: file.timeout_ms.unwrap_or(defaults.timeout_ms),
            incremental: file.incremental.unwrap_or(defaults.incremental),
            pool: file.pool.unwrap_or(defaults.pool),
            metrics: file.metrics.unwrap_or(defaults.metrics),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            timeout_ms: Some(self.timeout_ms),
            incremental: Some(self.incremental.clone()),
            pool: Some(self.pool.clone()),
            metrics: Some(self.metrics.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Defaults overlaid with `CODEGRAPH_ENGINE_*` process environment
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Overlay `CODEGRAPH_ENGINE_*` variables from `vars`; others are ignored
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "TIMEOUT_MS" => self.timeout_ms = parse_number(key, value)?,
                "INCREMENTAL" => self.incremental.enabled = parse_flag(key, value)?,
                "STATE_PATH" => self.incremental.state_path = PathBuf::from(value),
                "POOL" => self.pool.enabled = parse_flag(key, value)?,
                "MAX_WORKERS" => self.pool.max_workers = parse_number(key, value)?,
                "BATCH_SIZE" => self.pool.batch_size = parse_number(key, value)?,
                "POOL_THRESHOLD" => self.pool.threshold = parse_number(key, value)?,
                "STACK_SIZE_MB" => self.pool.stack_size_mb = parse_number(key, value)?,
                "METRICS" => self.metrics.enabled = parse_flag(key, value)?,
                "METRICS_PATH" => self.metrics.history_path = PathBuf::from(value),
                "METRICS_CAP" => self.metrics.history_cap = parse_number(key, value)?,
                _ => tracing::debug!("Ignoring unknown engine variable {}", key),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.max_workers == 0 || self.pool.max_workers > 256 {
            return Err(ConfigError::range_with_hint(
                "pool.max_workers",
                self.pool.max_workers,
                1,
                256,
                "Use pool.enabled: false to disable parallel execution",
            ));
        }
        if self.pool.batch_size == 0 {
            return Err(ConfigError::range_with_hint(
                "pool.batch_size",
                0,
                1,
                usize::MAX,
                "Batches must contain at least one file",
            ));
        }
        if self.pool.stack_size_mb < 1 || self.pool.stack_size_mb > 64 {
            return Err(ConfigError::range_with_hint(
                "pool.stack_size_mb",
                self.pool.stack_size_mb,
                1,
                64,
                "Stack size must be reasonable",
            ));
        }
        if self.metrics.history_cap == 0 {
            return Err(ConfigError::range_with_hint(
                "metrics.history_cap",
                0,
                1,
                usize::MAX,
                "Use metrics.enabled: false to stop recording history",
            ));
        }
        Ok(())
    }

    /// `None` when timeouts are disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn state_path(&self, base_dir: &Path) -> PathBuf {
        resolve(base_dir, &self.incremental.state_path)
    }

    pub fn history_path(&self, base_dir: &Path) -> PathBuf {
        resolve(base_dir, &self.metrics.history_path)
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_workers: self.pool.max_workers,
            batch_size: self.pool.batch_size,
            timeout_ms: self.timeout_ms,
            stack_size_mb: self.pool.stack_size_mb,
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn parse_flag(var: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_env(var, value, "expected true/false")),
    }
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_env(var, value, e.to_string()))
}

/// Per-call options of `Engine::run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Log per-unit progress at `info` instead of `debug`
    pub verbose: bool,
    /// Omit per-technique metrics from the result
    pub compact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.incremental.enabled);
        assert_eq!(config.pool.batch_size, 10);
        assert!(config.pool.max_workers >= 1 && config.pool.max_workers <= 8);
        assert_eq!(config.metrics.history_cap, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_sections() {
        let yaml = r#"
version: 1
timeout_ms: 500
pool:
  batch_size: 4
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.pool.batch_size, 4);
        assert_eq!(config.pool.threshold, DEFAULT_POOL_THRESHOLD);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_yaml_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"version: 1\nincremental:\n  enabled: false\n")
            .unwrap();

        let config = EngineConfig::from_yaml(temp_file.path()).unwrap();
        assert!(!config.incremental.enabled);
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = EngineConfig::from_yaml_str("timeout_ms: 10\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = EngineConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = EngineConfig::from_yaml_str("version: 1\npool:\n  workers: 3\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = EngineConfig::default();
        config.timeout_ms = 0;
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert_eq!(EngineConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_env(vec![
                ("CODEGRAPH_ENGINE_TIMEOUT_MS", "250"),
                ("CODEGRAPH_ENGINE_INCREMENTAL", "off"),
                ("CODEGRAPH_ENGINE_MAX_WORKERS", "3"),
                ("CODEGRAPH_ENGINE_METRICS_CAP", "5"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();

        assert_eq!(config.timeout_ms, 250);
        assert!(!config.incremental.enabled);
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.metrics.history_cap, 5);
    }

    #[test]
    fn test_env_invalid_values() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(vec![("CODEGRAPH_ENGINE_POOL", "maybe")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = config
            .apply_env(vec![("CODEGRAPH_ENGINE_BATCH_SIZE", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Range { .. }));

        let err = EngineConfig::default()
            .apply_env(vec![("CODEGRAPH_ENGINE_STACK_SIZE_MB", "128")])
            .unwrap_err();
        assert!(err.to_string().contains("pool.stack_size_mb"));
    }

    #[test]
    fn test_paths_resolved_against_base_dir() {
        let mut config = EngineConfig::default();
        let base = Path::new("/repo");
        assert_eq!(
            config.state_path(base),
            PathBuf::from("/repo/.codegraph/incremental-state.json")
        );

        config.metrics.history_path = PathBuf::from("/var/lib/history.json");
        assert_eq!(config.history_path(base), PathBuf::from("/var/lib/history.json"));
    }

    #[test]
    fn test_timeout_zero_disables() {
        let mut config = EngineConfig::default();
        config.timeout_ms = 0;
        assert!(config.timeout().is_none());
        assert_eq!(config.pool_options().timeout_ms, 0);
    }
}
