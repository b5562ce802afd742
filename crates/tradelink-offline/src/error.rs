//! Offline queue error types.

use thiserror::Error;
use tradelink_core::ApiError;
use tradelink_store::StoreError;

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("Invalid action: {0}")]
    Validation(String),

    #[error("Queued action not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<OfflineError> for ApiError {
    fn from(e: OfflineError) -> Self {
        match e {
            OfflineError::Validation(msg) => ApiError::validation(msg),
            OfflineError::NotFound(id) => ApiError::validation(format!("unknown action {id}")),
            OfflineError::Store(e) => e.into(),
        }
    }
}

pub type OfflineResult<T> = Result<T, OfflineError>;
