//! Configuration for commons-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LedgerError;
use crate::trust::Action;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commons-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Upper bound on waiting for the ledger lock before reporting a conflict
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Initial backoff between lock attempts (doubles each retry)
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,

    /// Buffered events per subscriber before lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Static trust grants used by the CLI's trust gate
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

/// One static authorization grant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantConfig {
    pub user_id: String,
    pub community_id: String,
    /// Actions granted; empty means every action
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_database_file() -> String {
    "ledger.db".to_string()
}

fn default_lock_wait_ms() -> u64 {
    2_000
}

fn default_lock_backoff_ms() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_backoff_ms: default_lock_backoff_ms(),
            event_capacity: default_event_capacity(),
            grants: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LedgerError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LedgerError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| LedgerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            max_wait: Duration::from_millis(self.lock_wait_ms),
            initial_backoff: Duration::from_millis(self.lock_backoff_ms.max(1)),
        }
    }
}

/// Bounded-wait policy for acquiring the ledger lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_wait: Duration,
    pub initial_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(default_lock_wait_ms()),
            initial_backoff: Duration::from_millis(default_lock_backoff_ms()),
        }
    }
}
