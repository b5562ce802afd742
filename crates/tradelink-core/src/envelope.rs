//! Persistent-channel message envelope.
//!
//! Both directions of the channel carry the same JSON shape:
//! `{"kind": ..., "data": ..., "timestamp": ..., "id": ..., "channel"?: ...}`.
//! `"type"` is accepted as an alias of `"kind"` on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix used for channel-scoped listener keys (`channel:<name>`).
pub const CHANNEL_KEY_PREFIX: &str = "channel:";

/// Reserved control kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Topic subscription: `{channel, params}`.
    Subscribe,
    /// Topic removal: `{channel}`.
    Unsubscribe,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
        }
    }

    /// Parse a kind string into a control kind, if it is one.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "PING" => Some(Self::Ping),
            "PONG" => Some(Self::Pong),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message kind (e.g. "TRADE_OPENED", "PING").
    #[serde(alias = "type")]
    pub kind: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub data: Value,
    /// Creation time (RFC 3339 on the wire).
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Correlation id.
    #[serde(default)]
    pub id: String,
    /// Optional channel the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl MessageEnvelope {
    /// Create a new envelope with a fresh id and the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            id: Uuid::new_v4().to_string(),
            channel: None,
        }
    }

    /// Attach a channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Heartbeat request.
    pub fn ping() -> Self {
        Self::new(ControlKind::Ping.as_str(), Value::Null)
    }

    /// Subscribe request for a topic.
    pub fn subscribe(topic: &str, params: Option<&Value>) -> Self {
        Self::new(
            ControlKind::Subscribe.as_str(),
            serde_json::json!({
                "channel": topic,
                "params": params.cloned().unwrap_or(Value::Null),
            }),
        )
    }

    /// Unsubscribe request for a topic.
    pub fn unsubscribe(topic: &str) -> Self {
        Self::new(
            ControlKind::Unsubscribe.as_str(),
            serde_json::json!({ "channel": topic }),
        )
    }

    /// Control kind of this envelope, if any.
    pub fn control_kind(&self) -> Option<ControlKind> {
        ControlKind::parse(&self.kind)
    }

    /// Listener key for the envelope's channel (`channel:<name>`).
    pub fn channel_key(&self) -> Option<String> {
        self.channel.as_deref().map(channel_key)
    }

    /// Parse an inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Build the listener key for a channel name.
pub fn channel_key(channel: &str) -> String {
    format!("{CHANNEL_KEY_PREFIX}{channel}")
}
