//! Configuration module
//!
//! TOML-backed application configuration. Missing file or missing keys fall
//! back to defaults, so a bare binary still starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::session::watchers::WatcherConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Default location: `<config dir>/chargelink/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chargelink")
        .join("config.toml")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for tasks during graceful shutdown.
    pub shutdown_timeout: u64,
    /// Per-connection outbound queue capacity in frames.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9100,
            shutdown_timeout: 30,
            queue_capacity: 64,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Upper bound on token resolution, in seconds.
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub start_budget_secs: u64,
    pub start_poll_secs: u64,
    pub stop_budget_secs: u64,
    pub stop_poll_secs: u64,
    pub stream_poll_secs: u64,
    pub repo_timeout_secs: u64,
    pub max_stream_errors: u32,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            start_budget_secs: 90,
            start_poll_secs: 2,
            stop_budget_secs: 90,
            stop_poll_secs: 3,
            stream_poll_secs: 5,
            repo_timeout_secs: 5,
            max_stream_errors: 10,
        }
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(s: &WatcherSettings) -> Self {
        Self {
            start_budget: Duration::from_secs(s.start_budget_secs),
            start_poll: Duration::from_secs(s.start_poll_secs),
            stop_budget: Duration::from_secs(s.stop_budget_secs),
            stop_poll: Duration::from_secs(s.stop_poll_secs),
            stream_poll: Duration::from_secs(s.stream_poll_secs),
            repo_timeout: Duration::from_secs(s.repo_timeout_secs),
            max_stream_errors: s.max_stream_errors,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub watcher: WatcherSettings,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::from(&self.watcher)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.timeout_secs)
    }
}

// ── Tests ──────────────────────────────────────────────────────
