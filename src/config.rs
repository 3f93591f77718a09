//! Configuration loader and validator for the restore workflow.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::MatchError;
use crate::matcher;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid configuration: {0}")]
    Pattern(#[from] MatchError),
}

/// Longest a single restore may be polled for (30 days).
pub const MAX_POLL_TIMEOUT_SECONDS: u64 = 30 * 24 * 60 * 60;
/// Largest retry backoff cap (1 day).
pub const MAX_BACKOFF_SECONDS: u64 = 24 * 60 * 60;

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub workflow: Workflow,
    pub store: Store,
}

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

/// What to restore, how to name it and where to publish it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub source_pattern: String,
    pub replacement_pattern: String,
    pub parameter_name: String,
    pub poll_interval_seconds: u64,
    pub poll_timeout_seconds: u64,
    pub max_restore_attempts: u32,
    pub max_publish_attempts: u32,
}

/// Store endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub restore_url: String,
    pub parameter_url: String,
    pub token: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Apply `SOURCE_PATTERN`, `REPLACEMENT_PATTERN`, `PARAMETER_NAME` and
    /// `STATE_MACHINE_NAME` from `lookup` over the file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SOURCE_PATTERN") {
            self.workflow.source_pattern = v;
        }
        if let Some(v) = lookup("REPLACEMENT_PATTERN") {
            self.workflow.replacement_pattern = v;
        }
        if let Some(v) = lookup("PARAMETER_NAME") {
            self.workflow.parameter_name = v;
        }
        if let Some(v) = lookup("STATE_MACHINE_NAME") {
            self.workflow.name = v;
        }
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/restorer.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. The source pattern must compile here so a
/// bad pattern stops startup instead of failing every notification.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.max_backoff_seconds > MAX_BACKOFF_SECONDS {
        return Err(ConfigError::Invalid("app.max_backoff_seconds must be <= 86400"));
    }

    let wf = &cfg.workflow;
    if wf.name.trim().is_empty() {
        return Err(ConfigError::Invalid("workflow.name must be non-empty"));
    }
    if wf.source_pattern.is_empty() {
        return Err(ConfigError::Invalid("workflow.source_pattern must be non-empty"));
    }
    matcher::compile(&wf.source_pattern)?;
    if wf.parameter_name.trim().is_empty() {
        return Err(ConfigError::Invalid("workflow.parameter_name must be non-empty"));
    }
    if wf.poll_interval_seconds == 0 {
        return Err(ConfigError::Invalid("workflow.poll_interval_seconds must be > 0"));
    }
    if wf.poll_timeout_seconds < wf.poll_interval_seconds {
        return Err(ConfigError::Invalid(
            "workflow.poll_timeout_seconds must be >= workflow.poll_interval_seconds",
        ));
    }
    if wf.poll_timeout_seconds > MAX_POLL_TIMEOUT_SECONDS {
        return Err(ConfigError::Invalid(
            "workflow.poll_timeout_seconds must be <= 2592000",
        ));
    }
    if wf.max_restore_attempts == 0 {
        return Err(ConfigError::Invalid("workflow.max_restore_attempts must be > 0"));
    }
    if wf.max_publish_attempts == 0 {
        return Err(ConfigError::Invalid("workflow.max_publish_attempts must be > 0"));
    }

    if cfg.store.restore_url.trim().is_empty() {
        return Err(ConfigError::Invalid("store.restore_url must be non-empty"));
    }
    if cfg.store.parameter_url.trim().is_empty() {
        return Err(ConfigError::Invalid("store.parameter_url must be non-empty"));
    }

    Ok(())
}

/// Example configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 300

workflow:
  name: "restore-backup"
  source_pattern: "Orders"
  replacement_pattern: "Orders-restored"
  parameter_name: "/restore/orders/table-arn"
  poll_interval_seconds: 30
  poll_timeout_seconds: 21600
  max_restore_attempts: 5
  max_publish_attempts: 5

store:
  restore_url: "http://localhost:8080/"
  parameter_url: "http://localhost:8081/"
  token: "YOUR_STORE_TOKEN"
"#
}
