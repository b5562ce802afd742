//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Periodic background replay. When off, replay only runs on reconnect
    /// or on an explicit `sync_now()`.
    #[serde(default)]
    pub background_sync: bool,
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
}

fn default_background_interval_ms() -> u64 {
    60_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            background_sync: false,
            background_interval_ms: default_background_interval_ms(),
        }
    }
}

impl SyncConfig {
    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(!config.background_sync);
        assert_eq!(config.background_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: SyncConfig = serde_json::from_str(r#"{"background_sync": true}"#).unwrap();
        assert!(config.background_sync);
        assert_eq!(config.background_interval_ms, 60_000);
    }
}
