//! Storage backend capability set.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Half-open key range `[from, to)`. `None` bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl KeyRange {
    /// Every key.
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            from: Some(prefix.to_string()),
            to: Some(format!("{prefix}{}", char::MAX)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.from.as_deref().map_or(true, |from| key >= from)
            && self.to.as_deref().map_or(true, |to| key < to)
    }
}

/// Usage and capacity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// Key-value storage with named collections.
///
/// Any embedded store can sit behind this trait. Each call is atomic on its
/// own; the `PersistenceStore` above serialises logical operations.
#[cfg_attr(test, mockall::automock)]
pub trait StorageBackend: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace. Fails with `QuotaExceeded` when the write does not fit.
    fn put(&self, collection: &str, key: &str, value: Value) -> StoreResult<()>;

    /// Returns whether the key existed.
    fn delete(&self, collection: &str, key: &str) -> StoreResult<bool>;

    /// Entries in key order.
    fn range_scan(&self, collection: &str, range: KeyRange) -> StoreResult<Vec<(String, Value)>>;

    /// `None` when the backend cannot estimate.
    fn estimate_quota(&self) -> Option<QuotaEstimate>;
}

/// Approximate stored size of one entry.
pub(crate) fn entry_size(key: &str, value: &Value) -> u64 {
    let value_len = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    (key.len() + value_len) as u64
}

/// In-memory backend.
///
/// With a capacity set, writes that would push usage past it fail with
/// `QuotaExceeded`, which exercises the eviction path without real disks.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    capacity: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            capacity: Some(capacity_bytes),
        }
    }

    fn usage(collections: &HashMap<String, BTreeMap<String, Value>>) -> u64 {
        collections
            .values()
            .flat_map(|c| c.iter())
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    fn put(&self, collection: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut collections = self.collections.write();

        if let Some(capacity) = self.capacity {
            let existing = collections
                .get(collection)
                .and_then(|c| c.get(key))
                .map_or(0, |v| entry_size(key, v));
            let usage = Self::usage(&collections) - existing;
            let needed = entry_size(key, &value);
            if usage + needed > capacity {
                return Err(StoreError::QuotaExceeded {
                    needed,
                    available: capacity.saturating_sub(usage),
                });
            }
        }

        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|c| c.remove(key).is_some()))
    }

    fn range_scan(&self, collection: &str, range: KeyRange) -> StoreResult<Vec<(String, Value)>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(k, _)| range.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn estimate_quota(&self) -> Option<QuotaEstimate> {
        let quota = self.capacity?;
        Some(QuotaEstimate {
            usage: Self::usage(&self.collections.read()),
            quota,
        })
    }
}
