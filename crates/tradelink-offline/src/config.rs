//! Offline storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Directory for durable storage. In-memory storage when unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// Byte quota for stored data. Unlimited when unset.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    /// TTL for cached responses when the caller gives none.
    #[serde(default = "default_cache_ttl_ms")]
    pub default_cache_ttl_ms: u64,
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            quota_bytes: None,
            default_cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl OfflineConfig {
    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms)
    }
}
