//! Error taxonomy shared by every tradelink component.
//!
//! Request-level failures are values, never panics: callers branch on
//! `ApiResult` (or the serialisable `ApiResponse`) and on `ErrorCode`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Closed set of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Persistent-channel open/send failure.
    Connection,
    /// Attempt exceeded its time bound.
    Timeout,
    /// Request-level transport failure.
    Network,
    /// Malformed payload.
    Parse,
    /// Durable storage failure (including quota exhaustion).
    Storage,
    /// Caller-supplied data rejected before any I/O.
    Validation,
    /// Request cancelled by the caller.
    Cancelled,
    /// Read attempted offline with no cached copy.
    OfflineUnavailable,
    /// HTTP status outside 2xx (serialised as the literal status).
    Http(u16),
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Wire representation.
    pub fn as_string(&self) -> String {
        match self {
            Self::Connection => "CONNECTION_ERROR".to_string(),
            Self::Timeout => "TIMEOUT".to_string(),
            Self::Network => "NETWORK_ERROR".to_string(),
            Self::Parse => "PARSE_ERROR".to_string(),
            Self::Storage => "STORAGE_ERROR".to_string(),
            Self::Validation => "VALIDATION_ERROR".to_string(),
            Self::Cancelled => "CANCELLED".to_string(),
            Self::OfflineUnavailable => "OFFLINE_UNAVAILABLE".to_string(),
            Self::Http(status) => status.to_string(),
            Self::Unknown => "UNKNOWN_ERROR".to_string(),
        }
    }

    /// Parse the wire representation. Unrecognised codes map to `Unknown`.
    pub fn parse(code: &str) -> Self {
        match code {
            "CONNECTION_ERROR" => Self::Connection,
            "TIMEOUT" => Self::Timeout,
            "NETWORK_ERROR" => Self::Network,
            "PARSE_ERROR" => Self::Parse,
            "STORAGE_ERROR" => Self::Storage,
            "VALIDATION_ERROR" => Self::Validation,
            "CANCELLED" => Self::Cancelled,
            "OFFLINE_UNAVAILABLE" => Self::OfflineUnavailable,
            other => other
                .parse::<u16>()
                .map(Self::Http)
                .unwrap_or(Self::Unknown),
        }
    }

    /// Network, timeout and 5xx errors are retried; 4xx never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Timeout => true,
            Self::Http(status) => (500..600).contains(status),
            _ => false,
        }
    }

    /// True for 4xx statuses.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Http(status) if (400..500).contains(status))
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::parse(&code))
    }
}

/// Structured request-level error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Parse, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Storage, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Request cancelled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn offline_unavailable(resource: &str) -> Self {
        Self::new(
            ErrorCode::OfflineUnavailable,
            format!("{resource} is unavailable offline"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Result of a request-level operation.
pub type ApiResult<T = Value> = Result<T, ApiError>;

/// Serialisable `{success, data?, error?}` shape of an `ApiResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl From<ApiResult> for ApiResponse {
    fn from(result: ApiResult) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

impl From<ApiResponse> for ApiResult {
    fn from(response: ApiResponse) -> Self {
        if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(response
                .error
                .unwrap_or_else(|| ApiError::unknown("Request failed without error details")))
        }
    }
}
