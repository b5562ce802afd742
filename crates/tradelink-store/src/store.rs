//! Persistence store: typed, TTL-aware collections over a backend.
//!
//! Every value is wrapped in a record carrying its write time, optional
//! expiry, last access time and a pinned flag. Expired records are removed
//! lazily when looked up. When a write hits the quota, the least recently
//! used non-pinned records are evicted and the write is retried once.

use crate::backend::{KeyRange, StorageBackend};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pending write actions, keyed by action id.
pub const QUEUED_ACTIONS: &str = "queued_actions";
/// Read-through response cache, keyed by request signature.
pub const RESPONSE_CACHE: &str = "response_cache";
/// Singleton blob of the last known view state.
pub const DASHBOARD_STATE: &str = "dashboard_state";

const COLLECTIONS: [&str; 3] = [QUEUED_ACTIONS, RESPONSE_CACHE, DASHBOARD_STATE];
const DASHBOARD_STATE_KEY: &str = "current";

/// Fraction (1/N) of eviction candidates dropped per quota failure.
const EVICTION_DIVISOR: usize = 4;

/// Time source. Injected in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    value: Value,
    stored_at: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    last_access: DateTime<Utc>,
    #[serde(default)]
    pinned: bool,
}

impl StoredRecord {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Expire after this long.
    pub ttl: Option<Duration>,
    /// Never evicted under quota pressure.
    pub pinned: bool,
}

impl PutOptions {
    pub fn pinned() -> Self {
        Self {
            ttl: None,
            pinned: true,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            pinned: false,
        }
    }
}

/// A decoded value with its record metadata.
#[derive(Debug, Clone)]
pub struct StoredEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Storage usage report. All zero when the backend cannot estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StorageQuota {
    pub usage: u64,
    pub quota: u64,
    pub available: u64,
    pub percentage: f64,
}

/// Typed persistence over a `StorageBackend`.
pub struct PersistenceStore {
    backend: Arc<dyn StorageBackend>,
    clock: Clock,
    /// Scopes one logical operation (one write incl. its eviction retry).
    txn: Mutex<()>,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(Utc::now),
            txn: Mutex::new(()),
        }
    }

    /// Store over a fresh `MemoryBackend`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::backend::MemoryBackend::new()))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Write `value` under `collection/key`.
    pub fn put<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
        opts: PutOptions,
    ) -> StoreResult<()> {
        let now = self.now();
        let expires_at = opts.ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        let record = StoredRecord {
            value: serde_json::to_value(value)?,
            stored_at: now,
            expires_at,
            last_access: now,
            pinned: opts.pinned,
        };
        let encoded = serde_json::to_value(&record)?;

        let _txn = self.txn.lock();
        match self.backend.put(collection, key, encoded.clone()) {
            Ok(()) => Ok(()),
            Err(e) if e.is_quota_exceeded() => {
                warn!(collection, key, error = %e, "Storage quota exceeded, evicting LRU entries");
                let evicted = self.evict_lru_locked(Some((collection, key)))?;
                info!(evicted, "Evicted entries, retrying write");
                self.backend
                    .put(collection, key, encoded)
                    .map_err(|e| StoreError::WriteFailed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Read a value. Expired records are deleted and reported as absent.
    pub fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> StoreResult<Option<T>> {
        Ok(self.get_entry(collection, key)?.map(|e| e.value))
    }

    /// Read a value together with its record metadata.
    pub fn get_entry<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StoreResult<Option<StoredEntry<T>>> {
        let _txn = self.txn.lock();
        let Some(raw) = self.backend.get(collection, key)? else {
            return Ok(None);
        };

        let mut record: StoredRecord = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(collection, key, error = %e, "Undecodable record, dropping");
                self.backend.delete(collection, key)?;
                return Ok(None);
            }
        };

        let now = self.now();
        if record.is_expired_at(now) {
            debug!(collection, key, "Record expired, evicting");
            self.backend.delete(collection, key)?;
            return Ok(None);
        }

        if !record.pinned {
            record.last_access = now;
            if let Ok(encoded) = serde_json::to_value(&record) {
                if let Err(e) = self.backend.put(collection, key, encoded) {
                    debug!(collection, key, error = %e, "Failed to update last access");
                }
            }
        }

        let value = serde_json::from_value(record.value)?;
        Ok(Some(StoredEntry {
            value,
            stored_at: record.stored_at,
            expires_at: record.expires_at,
        }))
    }

    pub fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        let _txn = self.txn.lock();
        self.backend.delete(collection, key)
    }

    /// Live entries in key order. Does not evict expired ones.
    pub fn scan<T: DeserializeOwned>(
        &self,
        collection: &str,
        range: KeyRange,
    ) -> StoreResult<Vec<(String, T)>> {
        let _txn = self.txn.lock();
        let now = self.now();
        let rows = self.backend.range_scan(collection, range)?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, raw)| {
                let record: StoredRecord = serde_json::from_value(raw).ok()?;
                if record.is_expired_at(now) {
                    return None;
                }
                match serde_json::from_value(record.value) {
                    Ok(v) => Some((key, v)),
                    Err(e) => {
                        warn!(collection, key = %key, error = %e, "Skipping undecodable entry");
                        None
                    }
                }
            })
            .collect())
    }

    /// Entries whose value has `field == expected` (secondary index lookup).
    pub fn scan_by_field<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<Vec<(String, T)>> {
        let rows: Vec<(String, Value)> = self.scan(collection, KeyRange::all())?;
        Ok(rows
            .into_iter()
            .filter(|(_, v)| v.get(field) == Some(expected))
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|t| (k, t)))
            .collect())
    }

    /// Delete every entry of a collection.
    pub fn clear_collection(&self, collection: &str) -> StoreResult<usize> {
        let _txn = self.txn.lock();
        let keys: Vec<String> = self
            .backend
            .range_scan(collection, KeyRange::all())?
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let mut removed = 0;
        for key in &keys {
            if self.backend.delete(collection, key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evict least recently used non-pinned entries.
    pub fn evict_lru(&self) -> StoreResult<usize> {
        let _txn = self.txn.lock();
        self.evict_lru_locked(None)
    }

    fn evict_lru_locked(&self, keep: Option<(&str, &str)>) -> StoreResult<usize> {
        let mut candidates: Vec<(DateTime<Utc>, &'static str, String)> = Vec::new();

        for collection in COLLECTIONS {
            for (key, raw) in self.backend.range_scan(collection, KeyRange::all())? {
                if keep.is_some_and(|(c, k)| c == collection && k == key) {
                    continue;
                }
                let Ok(record) = serde_json::from_value::<StoredRecord>(raw) else {
                    continue;
                };
                if !record.pinned {
                    candidates.push((record.last_access, collection, key));
                }
            }
        }

        if candidates.is_empty() {
            return Ok(0);
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        let count = (candidates.len() / EVICTION_DIVISOR).max(1);

        let mut evicted = 0;
        for (_, collection, key) in candidates.into_iter().take(count) {
            if self.backend.delete(collection, &key)? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Usage report; zeros when the backend cannot estimate.
    pub fn quota(&self) -> StorageQuota {
        match self.backend.estimate_quota() {
            Some(est) if est.quota > 0 => StorageQuota {
                usage: est.usage,
                quota: est.quota,
                available: est.quota.saturating_sub(est.usage),
                percentage: (est.usage as f64 / est.quota as f64) * 100.0,
            },
            _ => StorageQuota::default(),
        }
    }

    /// Persist the last known view state.
    pub fn save_dashboard_state(&self, state: &Value) -> StoreResult<()> {
        self.put(DASHBOARD_STATE, DASHBOARD_STATE_KEY, state, PutOptions::pinned())
    }

    pub fn load_dashboard_state(&self) -> StoreResult<Option<Value>> {
        self.get(DASHBOARD_STATE, DASHBOARD_STATE_KEY)
    }
}
