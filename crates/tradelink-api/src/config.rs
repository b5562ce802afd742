//! Request client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base address of the request API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt for retryable errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for retry backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay for retry backoff.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// How long a completed GET result is shared with identical calls.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_dedup_window_ms() -> u64 {
    2_000
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            dedup_window_ms: default_dedup_window_ms(),
            login_path: default_login_path(),
            logout_path: default_logout_path(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}
