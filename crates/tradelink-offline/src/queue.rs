//! Durable offline queue and response cache.

use crate::config::OfflineConfig;
use crate::error::{OfflineError, OfflineResult};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tradelink_core::{ActionType, CachedResponse, QueuedAction};
use tradelink_store::{
    FileBackend, KeyRange, MemoryBackend, PersistenceStore, PutOptions, StorageBackend,
    StorageQuota, QUEUED_ACTIONS, RESPONSE_CACHE,
};

/// Queue of writes waiting for replay, plus the response cache.
///
/// The in-memory list mirrors `queued_actions` in FIFO order. Every mutation
/// is persisted before the mirror changes.
pub struct OfflineQueue {
    store: Arc<PersistenceStore>,
    config: OfflineConfig,
    actions: RwLock<Vec<QueuedAction>>,
    next_seq: AtomicU64,
}

impl OfflineQueue {
    /// Open the queue over `store`, reloading persisted actions.
    pub fn open(store: Arc<PersistenceStore>, config: OfflineConfig) -> OfflineResult<Self> {
        let mut actions: Vec<QueuedAction> = store
            .scan(QUEUED_ACTIONS, KeyRange::all())?
            .into_iter()
            .map(|(_, action)| action)
            .collect();
        // Enqueue order, not creation time: an action may be built well
        // before it is queued.
        actions.sort_by_key(|a| a.seq);

        let next_seq = actions.iter().map(|a| a.seq + 1).max().unwrap_or(0);
        info!(pending = actions.len(), "Offline queue opened");

        Ok(Self {
            store,
            config,
            actions: RwLock::new(actions),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    /// Build the store described by `config` and open the queue over it.
    pub fn from_config(config: OfflineConfig) -> OfflineResult<Self> {
        let backend: Arc<dyn StorageBackend> = match &config.storage_dir {
            Some(dir) => {
                let backend = FileBackend::open(dir)?;
                match config.quota_bytes {
                    Some(quota) => Arc::new(backend.with_quota(quota)),
                    None => Arc::new(backend),
                }
            }
            None => match config.quota_bytes {
                Some(quota) => Arc::new(MemoryBackend::with_capacity(quota)),
                None => Arc::new(MemoryBackend::new()),
            },
        };
        Self::open(Arc::new(PersistenceStore::new(backend)), config)
    }

    pub fn store(&self) -> &Arc<PersistenceStore> {
        &self.store
    }

    // ========== Queue ==========

    /// Queue a write with the type's default retry ceiling.
    pub fn queue_action(
        &self,
        action_type: ActionType,
        action: &str,
        data: Value,
    ) -> OfflineResult<QueuedAction> {
        self.enqueue(QueuedAction::new(action_type, action, data))
    }

    /// Queue a prepared action. Persisted before returning.
    pub fn enqueue(&self, mut action: QueuedAction) -> OfflineResult<QueuedAction> {
        if action.action.trim().is_empty() {
            return Err(OfflineError::Validation("action path is empty".to_string()));
        }
        if action.max_retries == 0 {
            return Err(OfflineError::Validation(
                "max_retries must be positive".to_string(),
            ));
        }

        let mut actions = self.actions.write();
        action.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.persist(&action)?;
        actions.push(action.clone());

        info!(
            id = %action.id,
            action_type = %action.action_type,
            path = %action.action,
            max_retries = action.max_retries,
            pending = actions.len(),
            "Queued offline action"
        );
        Ok(action)
    }

    /// Pending actions in FIFO order.
    pub fn pending(&self) -> Vec<QueuedAction> {
        self.actions.read().clone()
    }

    pub fn head(&self) -> Option<QueuedAction> {
        self.actions.read().first().cloned()
    }

    pub fn get(&self, id: &str) -> Option<QueuedAction> {
        self.actions.read().iter().find(|a| a.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Persisted actions of one type, looked up through the `type` field.
    pub fn actions_by_type(&self, action_type: ActionType) -> OfflineResult<Vec<QueuedAction>> {
        let mut found: Vec<QueuedAction> = self
            .store
            .scan_by_field(
                QUEUED_ACTIONS,
                "type",
                &Value::String(action_type.as_str().to_string()),
            )?
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        found.sort_by_key(|a| a.seq);
        Ok(found)
    }

    /// Record one failed replay. Returns the updated action.
    pub fn mark_failed(&self, id: &str) -> OfflineResult<QueuedAction> {
        self.update(id, |a| a.record_failure())
    }

    /// Retire an action from automatic replay until `retry_failed_actions()`.
    pub fn mark_exhausted(&self, id: &str) -> OfflineResult<QueuedAction> {
        self.update(id, |a| a.retry_count = a.max_retries)
    }

    /// Remove a successfully replayed action.
    pub fn complete(&self, id: &str) -> OfflineResult<bool> {
        let mut actions = self.actions.write();
        let Some(pos) = actions.iter().position(|a| a.id == id) else {
            return Ok(false);
        };
        self.store.delete(QUEUED_ACTIONS, id)?;
        actions.remove(pos);
        debug!(id, pending = actions.len(), "Completed offline action");
        Ok(true)
    }

    /// Drop every pending action. Irreversible.
    pub fn clear_queue(&self) -> OfflineResult<usize> {
        let mut actions = self.actions.write();
        let removed = self.store.clear_collection(QUEUED_ACTIONS)?;
        actions.clear();
        warn!(removed, "Offline queue cleared");
        Ok(removed)
    }

    /// Reset exhausted actions to `retry_count = 0`. Returns how many were reset.
    pub fn retry_failed_actions(&self) -> OfflineResult<usize> {
        let mut actions = self.actions.write();
        let mut reset = 0;
        for action in actions.iter_mut().filter(|a| a.is_exhausted()) {
            let mut next = action.clone();
            next.retry_count = 0;
            self.persist(&next)?;
            *action = next;
            reset += 1;
        }
        if reset > 0 {
            info!(reset, "Re-entered exhausted actions for replay");
        }
        Ok(reset)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut QueuedAction)) -> OfflineResult<QueuedAction> {
        let mut actions = self.actions.write();
        let action = actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| OfflineError::NotFound(id.to_string()))?;

        let mut next = action.clone();
        f(&mut next);
        self.persist(&next)?;
        *action = next.clone();
        Ok(next)
    }

    fn persist(&self, action: &QueuedAction) -> OfflineResult<()> {
        self.store
            .put(QUEUED_ACTIONS, &action.id, action, PutOptions::pinned())?;
        Ok(())
    }

    // ========== Response cache ==========

    /// Cache `data` under `key` for `ttl` (config default when `None`).
    pub fn cache_response(&self, key: &str, data: &Value, ttl: Option<Duration>) -> OfflineResult<()> {
        let ttl = ttl.unwrap_or_else(|| self.config.default_cache_ttl());
        let now = self.store.now();
        let expiry = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        let entry = CachedResponse {
            key: key.to_string(),
            data: data.clone(),
            stored_at: now,
            expiry,
        };
        self.store
            .put(RESPONSE_CACHE, key, &entry, PutOptions::with_ttl(ttl))?;
        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cached response");
        Ok(())
    }

    /// Cached data for `key`, or `None` when absent or expired.
    pub fn get_cached_response(&self, key: &str) -> OfflineResult<Option<Value>> {
        let entry: Option<CachedResponse> = self.store.get(RESPONSE_CACHE, key)?;
        let now = self.store.now();
        Ok(entry.filter(|e| e.is_fresh_at(now)).map(|e| e.data))
    }

    pub fn storage_quota(&self) -> StorageQuota {
        self.store.quota()
    }

    // ========== Dashboard state ==========

    pub fn save_dashboard_state(&self, state: &Value) -> OfflineResult<()> {
        Ok(self.store.save_dashboard_state(state)?)
    }

    pub fn load_dashboard_state(&self) -> OfflineResult<Option<Value>> {
        Ok(self.store.load_dashboard_state()?)
    }
}
