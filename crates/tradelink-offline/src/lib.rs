//! Offline support for tradelink.
//!
//! `OfflineQueue` owns the durable queue of writes waiting for replay and a
//! read-through response cache. Both live in a `PersistenceStore`; the queue
//! keeps an in-memory FIFO mirror that is rebuilt from storage on open.

pub mod config;
pub mod error;
pub mod queue;

pub use config::OfflineConfig;
pub use error::{OfflineError, OfflineResult};
pub use queue::OfflineQueue;
