//! Persistent-channel client for tradelink.
//!
//! Provides a `ConnectionManager` with:
//! - Idempotent connect with a bounded open timeout
//! - Automatic reconnection with exponential backoff and an attempt ceiling
//! - Topic subscriptions restored in order on every reconnect
//! - Heartbeat PING while connected
//! - Observer-chain dispatch of inbound envelopes by kind and channel

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod subscription;

pub use config::ConnectionConfig;
pub use connection::ConnectionManager;
pub use dispatcher::{Dispatcher, HandlerError, HandlerId, MessageHandler};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use subscription::SubscriptionRegistry;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
