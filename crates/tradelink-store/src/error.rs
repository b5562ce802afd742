//! Persistence error types.

use thiserror::Error;
use tradelink_core::{ApiError, ErrorCode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage write failed after eviction: {0}")]
    WriteFailed(String),
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::new(ErrorCode::Storage, e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
