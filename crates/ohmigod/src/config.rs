//! Configuration file parsing and structures.
//!
//! ohmigod uses a single TOML file: logging, the HTTP API, and one table per
//! native integration under `[integrations]`.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::integrations::ohmonwifi::OhmOnWifiConfig;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(
    Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `ohmigod::integrations = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the tracing filter, with `level` replacing the configured default
    pub fn targets(&self, level: Option<LogLevel>) -> Targets {
        let default = level.unwrap_or(self.level);
        self.overrides
            .iter()
            .fold(Targets::new().with_default(default), |targets, (target, level)| {
                targets.with_target(target.clone(), *level)
            })
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

/// HTTP API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    /// OhmOnWifi temperature emulators
    #[serde(default)]
    pub ohmonwifi: Option<OhmOnWifiConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(ohmonwifi) = &self.integrations.ohmonwifi else {
            return Ok(());
        };

        if ohmonwifi.default_interval == 0 {
            return Err(ConfigError::Invalid(
                "integrations.ohmonwifi.default_interval must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &ohmonwifi.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ohmonwifi device id: {}",
                    device.id
                )));
            }
            if device.settings.interval == 0 {
                return Err(ConfigError::Invalid(format!(
                    "ohmonwifi device {}: interval must be at least 1",
                    device.id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
