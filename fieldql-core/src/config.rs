//! Configuration for FieldQL
//!
//! Settings are read from a TOML file. A missing file yields the defaults;
//! a present file is parsed and validated.

use crate::query::{QueryParser, DEFAULT_MAX_DEPTH, DEFAULT_QUERY};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// FieldQL configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldQlConfig {
    /// Query settings
    pub query: QuerySettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Registry settings
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Query applied when a request carries none
    pub default_query: String,
    /// Deepest brace nesting a query may use
    pub max_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level, overridden by `RUST_LOG`
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Enable slow projection logging
    pub slow_projection_logging: bool,
    /// Slow projection threshold in milliseconds
    pub slow_projection_threshold_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Fixture file loaded when no `--data` is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_query: DEFAULT_QUERY.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            slow_projection_logging: true,
            slow_projection_threshold_ms: 100,
        }
    }
}

impl FieldQlConfig {
    /// Load configuration from `path`, using defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: FieldQlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.query.max_depth == 0 {
            return Err(anyhow::anyhow!("Query max depth cannot be 0"));
        }

        QueryParser::parse_with_max_depth(&self.query.default_query, self.query.max_depth)
            .with_context(|| {
                format!("Default query is not valid: {}", self.query.default_query)
            })?;

        if self.logging.slow_projection_threshold_ms == 0 {
            return Err(anyhow::anyhow!("Slow projection threshold cannot be 0"));
        }

        Ok(())
    }
}
