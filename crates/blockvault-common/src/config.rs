//! Configuration types for BlockVault
//!
//! This module defines configuration structures for the block store and
//! the agent daemon. Every section has defaults so a partial TOML file is
//! enough to start an agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Root configuration for a BlockVault agent
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identity
    #[serde(default)]
    pub agent: AgentSection,
    /// Block store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent identity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSection {
    /// Human-readable agent name
    #[serde(default = "default_agent_name")]
    pub name: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
        }
    }
}

/// Block store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backing store target
    #[serde(default)]
    pub backend: BackendConfig,
    /// Path prefix under which all blocks and the usage ledger live
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Maximum concurrent backend calls in bulk delete and cleanup
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
    /// Page size requested from the backend when listing
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// How often the agent persists a changed usage ledger
    #[serde(default = "default_usage_flush_interval_ms")]
    pub usage_flush_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            base_path: default_base_path(),
            delete_concurrency: default_delete_concurrency(),
            list_page_size: default_list_page_size(),
            usage_flush_interval_ms: default_usage_flush_interval_ms(),
        }
    }
}

impl StoreConfig {
    /// Reject settings the store cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.delete_concurrency == 0 {
            return Err(Error::configuration("delete_concurrency must be at least 1"));
        }
        if self.list_page_size == 0 {
            return Err(Error::configuration("list_page_size must be at least 1"));
        }
        if self.base_path.trim_matches('/').is_empty() {
            return Err(Error::configuration("base_path must not be empty"));
        }
        if self.backend.container().is_empty() {
            return Err(Error::configuration("backend container must not be empty"));
        }
        Ok(())
    }
}

/// Backing store target
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process blob account (development and testing)
    Memory {
        #[serde(default = "default_container")]
        container: String,
    },
    /// Local or network-mounted filesystem
    Fs {
        /// Directory holding one sub-directory per container
        root: PathBuf,
        #[serde(default = "default_container")]
        container: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory {
            container: default_container(),
        }
    }
}

impl BackendConfig {
    /// Provider name
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::Fs { .. } => "fs",
        }
    }

    /// Target container (bucket) name
    #[must_use]
    pub fn container(&self) -> &str {
        match self {
            Self::Memory { container } | Self::Fs { container, .. } => container,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

fn default_agent_name() -> String {
    "blockvault-agent".to_string()
}

fn default_base_path() -> String {
    "blockvault".to_string()
}

fn default_container() -> String {
    "blockvault".to_string()
}

const fn default_delete_concurrency() -> usize {
    10
}

const fn default_list_page_size() -> usize {
    1000
}

const fn default_usage_flush_interval_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}
