//! Node configuration.
//!
//! This module provides [`NodeConfig`], the settings a sync node needs to
//! join a network: which object it replicates, where to bootstrap from, how
//! hard to retry, and where to keep its transaction history. Configuration is
//! persisted as TOML.
//!
//! # Example
//!
//! ```ignore
//! use telepathy_core::config::NodeConfig;
//!
//! let config = NodeConfig::from_toml_str(r#"
//!     object_id = "shared-notes"
//!
//!     [bootstrap]
//!     host = "10.0.0.1"
//!     port = 7000
//!
//!     [retry]
//!     max_retries = 3
//! "#)?;
//!
//! assert_eq!(config.retry.initial_delay_ms, 1000);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelepathyError};

/// Settings for one sync node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network-wide identifier of the replicated object
    pub object_id: String,

    /// Bootstrap node to connect to on startup (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapConfig>,

    /// Retry policy for bootstrap connections
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Directory for saved transaction history (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
}

/// Address of a bootstrap node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub host: String,
    pub port: u16,
}

/// Exponential backoff for connection attempts.
///
/// The first retry waits `initial_delay_ms`; each later one doubles the wait,
/// capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// The waits between consecutive attempts (`max_retries - 1` of them).
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.initial_delay_ms;
        for _ in 1..self.max_retries {
            delays.push(Duration::from_millis(delay.min(self.max_delay_ms)));
            delay = delay.saturating_mul(2);
        }
        delays
    }
}

impl NodeConfig {
    /// Create a config for `object_id` with default retry settings.
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            bootstrap: None,
            retry: RetryPolicy::default(),
            history_dir: None,
        }
    }

    /// Set the bootstrap node.
    pub fn with_bootstrap(mut self, host: impl Into<String>, port: u16) -> Self {
        self.bootstrap = Some(BootstrapConfig {
            host: host.into(),
            port,
        });
        self
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Render this config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load config from a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| TelepathyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Save config to a TOML file, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?).map_err(|source| TelepathyError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
