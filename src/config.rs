//! WolfCache Configuration
//!
//! Configuration structures for the replication engine. Loaded from TOML;
//! every field carries a default so a minimal file (or an empty one) still
//! produces a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main wolfcache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfCacheConfig {
    /// Replication backlog configuration
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Replication backlog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Total backlog capacity in bytes (0 disables replication entirely;
    /// the instance can then not serve as a master)
    #[serde(default = "default_backlog_size")]
    pub backlog_size: u64,

    /// In-memory write-combining cache in front of the backlog files
    #[serde(default = "default_backlog_cache_size")]
    pub backlog_cache_size: usize,

    /// Seconds between periodic WAL syncs (0 disables periodic sync)
    #[serde(default = "default_sync_period_secs")]
    pub sync_period_secs: u64,

    /// Directory holding the backlog segment and metadata files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Master address to replicate from; empty means this instance is
    /// itself a master
    #[serde(default)]
    pub master_host: String,
}

fn default_backlog_size() -> u64 {
    64 * 1024 * 1024
}

fn default_backlog_cache_size() -> usize {
    4 * 1024 * 1024
}

fn default_sync_period_secs() -> u64 {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfcache/repl")
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            backlog_size: default_backlog_size(),
            backlog_cache_size: default_backlog_cache_size(),
            sync_period_secs: default_sync_period_secs(),
            data_dir: default_data_dir(),
            master_host: String::new(),
        }
    }
}

impl WolfCacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: WolfCacheConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let repl = &self.replication;
        if repl.backlog_size > 0 && repl.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config(
                "replication.data_dir cannot be empty when the backlog is enabled".into(),
            ));
        }
        if repl.backlog_cache_size as u64 > repl.backlog_size && repl.backlog_size > 0 {
            return Err(crate::Error::Config(
                "replication.backlog_cache_size cannot exceed replication.backlog_size".into(),
            ));
        }
        Ok(())
    }
}

impl ReplicationConfig {
    /// Whether the backlog is enabled at all
    pub fn backlog_enabled(&self) -> bool {
        self.backlog_size > 0
    }

    /// Whether this instance acts as a master (no upstream configured)
    pub fn is_master(&self) -> bool {
        self.master_host.is_empty()
    }

    /// Get the periodic sync interval, `None` when disabled
    pub fn sync_period(&self) -> Option<Duration> {
        if self.sync_period_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sync_period_secs))
        }
    }
}
