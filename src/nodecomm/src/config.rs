use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Socket-level parameters of the bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub connect_retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// SO_REUSEADDR on the coordinator's listening socket
    pub reuse_address: bool,
    /// clear IPV6_V6ONLY so an IPv6 listener also takes IPv4 peers; when
    /// false the option is set and IPv6 sockets stay IPv6-only
    pub dual_stack: bool,
    pub tcp_nodelay: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            connect_retry_interval_ms: 100,
            connect_timeout_ms: 120_000,
            reuse_address: true,
            dual_stack: true,
            tcp_nodelay: true,
        }
    }
}

impl BootstrapConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
