// relboard-config - Layered configuration for the relboard binary
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from RELBOARD_CONFIG env var
// 3. Config file contents from RELBOARD_CONFIG_CONTENT env var
// 4. Default config file location (./relboard.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelboardConfig {
    #[serde(default)]
    pub counts: CountsConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Count engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountsConfig {
    pub debounce_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub tabs: StrategyConfig,
    pub buttons: StrategyConfig,
}

impl CountsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 750,
            cache_ttl_secs: 60,
            cache_capacity: 500,
            tabs: StrategyConfig::default(),
            buttons: StrategyConfig::default(),
        }
    }
}

/// Batching parameters of one count strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub batch_size: usize,
    pub parallel_requests: usize,
    pub retry_on_error: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
}

impl StrategyConfig {
    pub fn retry_backoff(&self) -> Option<Duration> {
        self.retry_backoff_ms.map(Duration::from_millis)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            parallel_requests: 1,
            retry_on_error: 1,
            retry_backoff_ms: None,
        }
    }
}

/// Search backend the counts are sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl RelboardConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file (CLI `--config`), then apply
    /// environment overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Parse TOML content on top of the defaults, without env overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RelboardConfig =
            toml::from_str(content).context("Failed to parse config content")?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from optional inline content plus overrides
    /// supplied by an `EnvSource`.
    pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<Self> {
        let mut config = match inline_config {
            Some(inline) => toml::from_str(inline).context("Failed to parse inline config content")?,
            None => RelboardConfig::default(),
        };
        config.apply_env_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
