//! Durable local persistence for tradelink.
//!
//! A `PersistenceStore` exposes named collections with key lookup, range
//! scan and TTL-aware get/put over any `StorageBackend`:
//! - `MemoryBackend`: in-process, optional byte capacity
//! - `FileBackend`: one JSON document per collection, atomic per operation
//!
//! The store is the only writer to durable storage; each public operation is
//! one transaction.

pub mod backend;
pub mod error;
pub mod file_backend;
pub mod store;

pub use backend::{KeyRange, MemoryBackend, QuotaEstimate, StorageBackend};
pub use error::{StoreError, StoreResult};
pub use file_backend::FileBackend;
pub use store::{
    Clock, PersistenceStore, PutOptions, StorageQuota, StoredEntry, DASHBOARD_STATE, QUEUED_ACTIONS,
    RESPONSE_CACHE,
};
