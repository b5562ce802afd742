//! Sync error types.

use thiserror::Error;
use tradelink_core::ApiError;
use tradelink_offline::OfflineError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network unavailable")]
    Offline,

    #[error("Persistent channel not connected")]
    NotConnected,

    #[error(transparent)]
    Queue(#[from] OfflineError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Offline => ApiError::network("network unavailable"),
            SyncError::NotConnected => ApiError::new(
                tradelink_core::ErrorCode::Connection,
                "persistent channel not connected",
            ),
            SyncError::Queue(e) => e.into(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
