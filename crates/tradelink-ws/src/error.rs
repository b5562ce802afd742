//! Persistent-channel error types.

use thiserror::Error;
use tradelink_core::{ApiError, ErrorCode};

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Connection attempt timed out after {0}ms")]
    Timeout(u64),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<WsError> for ApiError {
    fn from(e: WsError) -> Self {
        let code = match &e {
            WsError::Timeout(_) => ErrorCode::Timeout,
            WsError::Json(_) => ErrorCode::Parse,
            _ => ErrorCode::Connection,
        };
        ApiError::new(code, e.to_string())
    }
}

pub type WsResult<T> = Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let e: ApiError = WsError::Timeout(5000).into();
        assert_eq!(e.code, ErrorCode::Timeout);

        let e: ApiError = WsError::ConnectionClosed {
            code: 1006,
            reason: "abnormal".into(),
        }
        .into();
        assert_eq!(e.code, ErrorCode::Connection);
        assert!(e.message.contains("1006"));
    }
}
