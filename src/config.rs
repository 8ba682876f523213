use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::ParseOptions;
use crate::pool::{PoolConfig, WorkerCommand};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ingestion settings, read from a TOML file
///
/// Every key is optional:
///
/// ```toml
/// max_concurrency = 4
/// tool = "/opt/dicom/bin/dicom-compress"
/// request_timeout_ms = 60000
/// default_timezone_offset_minutes = 60
/// compress = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub max_concurrency: usize,
    pub tool: String,
    pub tool_args: Vec<String>,
    pub acquire_timeout_ms: u64,
    pub create_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub create_retry_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub default_timezone_offset_minutes: i32,
    pub default_character_set: Option<String>,
    /// Route imported instances through the compression pool
    pub compress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            tool: "dicom-compress".to_string(),
            tool_args: vec!["--interactive".to_string()],
            acquire_timeout_ms: 30_000,
            create_timeout_ms: 10_000,
            idle_timeout_ms: 300_000,
            create_retry_interval_ms: 500,
            request_timeout_ms: 120_000,
            default_timezone_offset_minutes: 0,
            default_character_set: None,
            compress: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        if self.tool.trim().is_empty() {
            return Err(ConfigError::Invalid("tool must not be empty".to_string()));
        }
        // offsets from UTC range from -12:00 to +14:00
        if !(-12 * 60..=14 * 60).contains(&self.default_timezone_offset_minutes) {
            return Err(ConfigError::Invalid(format!(
                "default_timezone_offset_minutes {} is out of range",
                self.default_timezone_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrency: self.max_concurrency,
            command: WorkerCommand {
                program: self.tool.clone(),
                args: self.tool_args.clone(),
            },
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            create_timeout: Duration::from_millis(self.create_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            create_retry_interval: Duration::from_millis(self.create_retry_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            default_timezone_offset_minutes: self.default_timezone_offset_minutes,
            default_character_set: self.default_character_set.clone(),
            reference_date: None,
        }
    }
}
