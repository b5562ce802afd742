//! Application configuration.
//!
//! Every field has a default, so a missing file or an empty environment
//! still yields a usable configuration. Sources, lowest priority first:
//! built-in defaults, an optional TOML file, then `TRADELINK__SECTION__FIELD`
//! environment variables.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tradelink_api::ApiConfig;
use tradelink_offline::OfflineConfig;
use tradelink_sync::SyncConfig;
use tradelink_ws::ConnectionConfig;

const ENV_PREFIX: &str = "TRADELINK";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ws: ConnectionConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load defaults, then `path` when given, then the environment.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        tracing::debug!(
            api = %config.api.base_url,
            ws = %config.ws.url,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from a specific TOML file, without environment overrides.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Persist offline data under `dir` instead of in memory.
    pub fn with_offline_dir(mut self, dir: PathBuf) -> Self {
        self.offline.storage_dir = Some(dir);
        self
    }
}
