//! Configuration Management
//!
//! Persistent settings for the `armrt` CLI. Access tokens are never stored.

use crate::operation::{
    PollerOptions, DEFAULT_DROPPED_CONNECTIONS_ALLOWED, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Public cloud resource-manager endpoint
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
/// `api-version` used when neither the URL nor the config names one
pub const DEFAULT_API_VERSION: &str = "2022-12-01";

pub const ENDPOINT_ENV: &str = "ARMRT_ENDPOINT";
pub const API_VERSION_ENV: &str = "ARMRT_API_VERSION";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Resource-manager endpoint relative URLs are joined to
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Default `api-version` query parameter
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub poll: PollConfig,
}

/// `poll` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_dropped_connections")]
    pub dropped_connections_allowed: u32,
}

fn default_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_min_interval_ms() -> u64 {
    MIN_POLL_INTERVAL.as_millis() as u64
}

fn default_dropped_connections() -> u32 {
    DEFAULT_DROPPED_CONNECTIONS_ALLOWED
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval_secs(),
            min_interval_ms: default_min_interval_ms(),
            dropped_connections_allowed: default_dropped_connections(),
        }
    }
}

impl From<&PollConfig> for PollerOptions {
    fn from(poll: &PollConfig) -> Self {
        Self {
            default_interval: Duration::from_secs(poll.default_interval_secs),
            min_interval: Duration::from_millis(poll.min_interval_ms),
            dropped_connections_allowed: poll.dropped_connections_allowed,
            ..PollerOptions::default()
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("armrt").join("config.json"))
    }

    /// Load configuration from disk, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; missing or unreadable files give defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

        Ok(())
    }

    /// Get effective endpoint (env > config > public cloud)
    pub fn effective_endpoint(&self) -> String {
        env_override(ENDPOINT_ENV)
            .or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Get effective api-version (env > config > built-in default)
    pub fn effective_api_version(&self) -> String {
        env_override(API_VERSION_ENV)
            .or_else(|| self.api_version.clone())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions::from(&self.poll)
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
