//! Configuration for lamad-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamad-engine")
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the SQLite record store and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Record store file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Replies at a depth below this may receive child replies
    #[serde(default = "default_reply_depth_limit")]
    pub reply_depth_limit: usize,

    /// Maximum discussion title length in characters
    #[serde(default = "default_max_title_len")]
    pub max_title_len: usize,

    /// Maximum discussion/reply body length in characters
    #[serde(default = "default_max_body_len")]
    pub max_body_len: usize,

    /// Delete replies and upvotes along with their discussion
    #[serde(default)]
    pub cascade_discussion_delete: bool,

    /// Notify authors when their discussion or reply is upvoted
    #[serde(default)]
    pub notify_on_upvote: bool,

    /// Broadcast channel capacity for engine events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_database_file() -> String {
    "lamad.db".to_string()
}

fn default_reply_depth_limit() -> usize {
    2
}

fn default_max_title_len() -> usize {
    300
}

fn default_max_body_len() -> usize {
    20_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            reply_depth_limit: default_reply_depth_limit(),
            max_title_len: default_max_title_len(),
            max_body_len: default_max_body_len(),
            cascade_discussion_delete: false,
            notify_on_upvote: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the services cannot work with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.database_file.is_empty() {
            return Err(EngineError::Config("database_file must not be empty".into()));
        }
        if self.max_title_len == 0 || self.max_body_len == 0 {
            return Err(EngineError::Config("length limits must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Get record store path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
