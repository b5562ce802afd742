//! Application error types.

use thiserror::Error;
use tradelink_core::ApiError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API client error: {0}")]
    Api(#[from] ApiError),

    #[error("Offline storage error: {0}")]
    Offline(#[from] tradelink_offline::OfflineError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tradelink_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
