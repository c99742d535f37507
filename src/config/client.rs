//! Client configuration
//!
//! Loads connection settings from a TOML file, falling back to defaults when the file
//! is absent. The endpoint URL can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable overriding the endpoint URL
pub const URL_ENV_VAR: &str = "DASHBOARD_WS_URL";

/// Local development endpoint
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

/// Upper bound on any reconnect delay
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid endpoint URL {0}: {1}")]
    InvalidUrl(String, String),
}

/// Connection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Schedule reconnects after the transport closes
    pub auto_reconnect: bool,
    /// Reconnect budget before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect, doubled per attempt
    pub reconnect_base_delay_ms: u64,
    /// Cap on the reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// Keepalive period while connected
    pub heartbeat_interval_ms: u64,
    /// Open the connection as soon as the manager starts
    pub connect_on_init: bool,
    /// File holding the authentication token
    pub token_file: Option<PathBuf>,
    /// Probe endpoint reachability at this period to detect offline/online transitions
    pub network_probe_interval_ms: Option<u64>,
}

impl Default for ClientConfig {
    /// Reconnection stays dormant until the server side supports it
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            auto_reconnect: false,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_delay_ms: MAX_RECONNECT_DELAY_MS,
            heartbeat_interval_ms: 30_000,
            connect_on_init: true,
            token_file: None,
            network_probe_interval_ms: None,
        }
    }
}

impl ClientConfig {
    /// Defaults with automatic reconnection switched on
    pub fn active() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_url_override(std::env::var(URL_ENV_VAR).ok())
    }

    /// Replace the URL when an override is present and non-empty
    pub fn with_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.url = url.trim().to_string();
        }
        self
    }

    /// Parse and check the endpoint URL
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url =
            Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl(self.url.clone(), e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::InvalidUrl(
                self.url.clone(),
                format!("unsupported scheme '{}'", other),
            )),
        }
    }

    /// Get the first reconnect delay
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Get the reconnect delay cap, never above 30 seconds
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.min(MAX_RECONNECT_DELAY_MS))
    }

    /// Get the heartbeat period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Get the network probe period, if probing is enabled
    pub fn network_probe_interval(&self) -> Option<Duration> {
        self.network_probe_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
