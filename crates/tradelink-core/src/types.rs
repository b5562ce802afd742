//! Data model shared across components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persistent-channel status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until a manual `connect()`.
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// An attempt is pending or open.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the persistent channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Failed attempts since the last manual connect or successful open.
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

/// A topic the caller wants to receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            topic: topic.into(),
            params,
        }
    }
}

/// Class of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Trade,
    Config,
    System,
}

impl ActionType {
    /// Default retry ceiling. Trading actions get the highest.
    pub fn default_max_retries(&self) -> u32 {
        match self {
            Self::Trade => 5,
            Self::Config => 3,
            Self::System => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Config => "config",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write deferred for later replay.
///
/// `action` is the request path the write replays to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub action: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub data: Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// FIFO tiebreaker for actions created in the same millisecond.
    #[serde(default)]
    pub seq: u64,
}

impl QueuedAction {
    /// Create a new action with the type's default retry ceiling.
    pub fn new(action_type: ActionType, action: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_type,
            action: action.into(),
            method: HttpMethod::Post,
            data,
            retry_count: 0,
            max_retries: action_type.default_max_retries(),
            created_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Retry ceiling reached.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Record one failed replay. Never exceeds `max_retries`.
    pub fn record_failure(&mut self) {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
    }
}

/// A read-through cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request signature.
    pub key: String,
    pub data: Value,
    pub stored_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiry
    }
}
