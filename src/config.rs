//! Configuration module for socksroute
//!
//! Optional JSON file; every field has a default and command line values
//! override what the file says. Routes are never part of the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::endpoint::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SCHEME};
use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen endpoint, e.g. "socks5://*:1080"
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Read operator commands from stdin
    #[serde(default = "default_interactive")]
    pub interactive: bool,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub dns: DnsConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interactive: default_interactive(),
            log: LogConfig::default(),
            dns: DnsConfig::default(),
        }
    }
}

fn default_listen() -> String {
    format!("{}://{}:{}", DEFAULT_SCHEME, DEFAULT_HOST, DEFAULT_PORT)
}

fn default_interactive() -> bool {
    true
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins over it
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Resolver cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Number of host names kept; 0 disables the cache
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_size() -> usize {
    256
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl DnsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}
