//! Daemon configuration.

use serde::{Deserialize, Serialize};

use adcc_webhooks::WebhookConfig;

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level, used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Periodic cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Seconds between passes.
    pub interval_secs: u64,
    /// Inactive webhooks older than this are removed.
    pub inactive_days: u32,
    /// Delivery records older than this are removed.
    pub history_days: u32,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            inactive_days: 30,
            history_days: 30,
        }
    }
}

/// Full daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub webhooks: WebhookConfig,
    pub housekeeping: HousekeepingConfig,
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<DaemonConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parses TOML configuration. Missing sections fall back to defaults.
pub fn parse_config(content: &str) -> Result<DaemonConfig, ConfigError> {
    let config: toml::Value =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let server = section(&config, "server")?.unwrap_or_default();
    let webhooks: WebhookConfig = section(&config, "webhooks")?.unwrap_or_default();
    let housekeeping: HousekeepingConfig = section(&config, "housekeeping")?.unwrap_or_default();

    webhooks
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    if housekeeping.interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "housekeeping.interval_secs must be positive".to_string(),
        ));
    }

    Ok(DaemonConfig {
        server,
        webhooks,
        housekeeping,
    })
}

fn section<T: serde::de::DeserializeOwned>(
    config: &toml::Value,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    config
        .get(name)
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(format!("[{}] {}", name, e)))
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
