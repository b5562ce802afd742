//! Connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Persistent-channel URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Bound on one open attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// PING interval while connected.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Base delay for exponential backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up (terminal `error` state).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}
