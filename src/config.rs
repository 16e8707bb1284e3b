//! Sync core configuration
//!
//! A single JSON object. Every field is optional and falls back to its
//! default, so `{}` is a valid config. Durations are given in
//! milliseconds. Loading always validates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no sync config at {0}")]
    Missing(PathBuf),
    #[error("could not read sync config: {0}")]
    Io(#[from] std::io::Error),
    #[error("sync config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Runtime configuration for the sync core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many accepted operations each document keeps for transformation.
    /// Submissions based on anything older are rejected as stale.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    /// Idle time (in millis) after which a session starts closing.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Bounded mailbox size for each document actor.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Buffer size of the in-process broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// How many times a merge recomputes after losing a race for the main line.
    #[serde(default = "default_merge_retry_limit")]
    pub merge_retry_limit: u32,
}

fn default_history_retention() -> usize {
    1024
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_merge_retry_limit() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_retention: default_history_retention(),
            idle_timeout_ms: default_idle_timeout_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            merge_retry_limit: default_merge_retry_limit(),
        }
    }
}

impl SyncConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_retention == 0 {
            return Err(ConfigError::Invalid(
                "history_retention must be at least 1".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be at least 1".into(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broadcast_capacity must be at least 1".into(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
