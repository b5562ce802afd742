//! Core types for the tradelink connectivity layer.
//!
//! This crate provides the pieces every other tradelink crate shares:
//! - `MessageEnvelope`: the persistent-channel wire format
//! - `ErrorCode` / `ApiError`: the closed error taxonomy callers branch on
//! - `ConnectionStatus`, `Subscription`, `QueuedAction`: the data model
//! - `Scheduler`: per-component timer/task ownership with cancel-all
//! - `backoff_delay`: exponential backoff shared by reconnects and retries

pub mod backoff;
pub mod envelope;
pub mod error;
pub mod scheduler;
pub mod types;

pub use backoff::backoff_delay;
pub use envelope::{channel_key, ControlKind, MessageEnvelope, CHANNEL_KEY_PREFIX};
pub use error::{ApiError, ApiResponse, ApiResult, ErrorCode};
pub use scheduler::Scheduler;
pub use types::{
    ActionType, CachedResponse, ConnectionState, ConnectionStatus, HttpMethod, QueuedAction,
    Subscription,
};
