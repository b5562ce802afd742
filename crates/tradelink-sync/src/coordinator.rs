//! Offline mode tracking and queue replay.
//!
//! The coordinator follows the persistent channel's status through a
//! `watch` receiver. Because the channel re-sends its subscriptions before
//! it publishes `Connected`, a replay started on that transition always
//! runs after the subscriptions are restored.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mode::{OfflineCapabilities, OfflineMode};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use tradelink_api::{ApiClient, ApiRequest, RequestOptions};
use tradelink_core::{
    ActionType, ApiError, ApiResult, ConnectionStatus, HttpMethod, QueuedAction, Scheduler,
};
use tradelink_offline::OfflineQueue;

/// Header carrying the action id on every send and replay of a write.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// What happened to a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Accepted by the backend.
    Sent(Value),
    /// Deferred for replay.
    Queued(QueuedAction),
}

/// Result of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub replayed: usize,
    pub failed: usize,
    /// Exhausted actions re-entered before the pass.
    pub reset: usize,
    /// Exhausted head that stopped the pass.
    pub blocked_by: Option<String>,
    pub remaining: usize,
}

/// Running totals across every replay pass, whatever triggered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub passes: u64,
    pub replayed: u64,
    pub failed: u64,
    /// Queue length after the latest pass.
    pub remaining: usize,
}

struct Inner {
    api: ApiClient,
    queue: Arc<OfflineQueue>,
    config: SyncConfig,
    channel: watch::Receiver<ConnectionStatus>,
    network_available: AtomicBool,
    mode_tx: watch::Sender<OfflineMode>,
    stats_tx: watch::Sender<SyncStats>,
    /// One replay pass at a time.
    drain_lock: AsyncMutex<()>,
    scheduler: Scheduler,
    initialized: AtomicBool,
}

/// Reconciles the offline queue with the backend.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// `channel` is the persistent channel's status feed
    /// (`ConnectionManager::watch_state()`).
    pub fn new(
        api: ApiClient,
        queue: Arc<OfflineQueue>,
        channel: watch::Receiver<ConnectionStatus>,
        config: SyncConfig,
    ) -> Self {
        let initial = OfflineMode::from_signals(true, *channel.borrow());
        let (mode_tx, _) = watch::channel(initial);
        let (stats_tx, _) = watch::channel(SyncStats::default());
        Self {
            inner: Arc::new(Inner {
                api,
                queue,
                config,
                channel,
                network_available: AtomicBool::new(true),
                mode_tx,
                stats_tx,
                drain_lock: AsyncMutex::new(()),
                scheduler: Scheduler::new("sync"),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Start following the channel and, when enabled, periodic replay.
    /// Idempotent.
    pub fn init(&self) {
        let inner = &self.inner;
        if inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.refresh_mode();
        self.spawn_channel_watcher();

        if inner.config.background_sync {
            let ticker = Arc::clone(inner);
            inner
                .scheduler
                .spawn_interval(inner.config.background_interval(), move || {
                    let inner = Arc::clone(&ticker);
                    async move { inner.background_tick().await }
                });
        }

        let status = *inner.channel.borrow();
        if status == ConnectionStatus::Connected && !inner.queue.is_empty() {
            info!(pending = inner.queue.len(), "Replaying actions persisted by a previous session");
            Inner::spawn_drain(inner, "startup");
        }

        info!(
            mode = %self.mode(),
            background_sync = inner.config.background_sync,
            "Sync coordinator initialized"
        );
    }

    /// Stop every task. Idempotent; `init()` may be called again.
    pub fn destroy(&self) {
        self.inner.scheduler.cancel_all();
        if self.inner.initialized.swap(false, Ordering::SeqCst) {
            debug!("Sync coordinator destroyed");
        }
    }

    fn spawn_channel_watcher(&self) {
        let inner = Arc::clone(&self.inner);
        let mut rx = self.inner.channel.clone();
        self.inner.scheduler.spawn(async move {
            let mut previous = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                inner.refresh_mode();
                if status == ConnectionStatus::Connected && previous != ConnectionStatus::Connected
                {
                    inner.on_channel_connected(previous);
                }
                previous = status;
            }
        });
    }

    /// Platform connectivity signal.
    pub fn set_network_available(&self, available: bool) {
        let inner = &self.inner;
        let previous = inner.network_available.swap(available, Ordering::SeqCst);
        if previous == available {
            return;
        }
        info!(available, "Network availability changed");
        inner.refresh_mode();

        if available && !inner.queue.is_empty() && inner.initialized.load(Ordering::SeqCst) {
            Inner::spawn_drain(inner, "network restored");
        }
    }

    pub fn network_available(&self) -> bool {
        self.inner.network_available.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> OfflineMode {
        *self.inner.mode_tx.borrow()
    }

    pub fn watch_mode(&self) -> watch::Receiver<OfflineMode> {
        self.inner.mode_tx.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        *self.inner.stats_tx.borrow()
    }

    /// Totals feed, updated after every pass (reconnect, startup,
    /// background, network restore and `sync_now`).
    pub fn watch_stats(&self) -> watch::Receiver<SyncStats> {
        self.inner.stats_tx.subscribe()
    }

    pub fn offline_capabilities(&self) -> OfflineCapabilities {
        self.mode().capabilities()
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.queue
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Send a write now, or queue it when the network is down or the send
    /// fails in a retryable way. Client errors are returned, not queued.
    pub async fn write(
        &self,
        action_type: ActionType,
        method: HttpMethod,
        path: &str,
        body: Value,
    ) -> ApiResult<WriteOutcome> {
        if method == HttpMethod::Get {
            return Err(ApiError::validation("GET is not a write"));
        }
        if path.trim().is_empty() {
            return Err(ApiError::validation("write path is empty"));
        }

        let action = QueuedAction::new(action_type, path, body).with_method(method);
        if self.mode() == OfflineMode::ReadOnly {
            return self.inner.enqueue(action, "network unavailable");
        }

        match self.inner.replay(&action).await {
            Ok(data) => Ok(WriteOutcome::Sent(data)),
            Err(e) if e.is_retryable() => self.inner.enqueue(action, &e.message),
            Err(e) => Err(e),
        }
    }

    /// GET with cache store on success and cache fallback when unreachable.
    pub async fn read(&self, path: &str, params: Option<Value>) -> ApiResult {
        let key = ApiRequest::new(HttpMethod::Get, path)
            .with_params(params.clone())
            .dedup_key();

        if self.mode() == OfflineMode::ReadOnly {
            return self.inner.cached_or_unavailable(&key);
        }

        match self.inner.api.get(path, params).await {
            Ok(data) => {
                if let Err(e) = self.inner.queue.cache_response(&key, &data, None) {
                    warn!(key = %key, error = %e, "Failed to cache response");
                }
                Ok(data)
            }
            Err(e) if e.is_retryable() => {
                debug!(key = %key, code = %e.code, "Read failed, trying cache");
                self.inner.cached_or_unavailable(&key)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one replay pass now.
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        self.inner.drain().await
    }

    /// Re-enter exhausted actions and replay. Only while the channel is up.
    pub async fn retry_failed_actions(&self) -> SyncResult<SyncReport> {
        if *self.inner.channel.borrow() != ConnectionStatus::Connected {
            return Err(SyncError::NotConnected);
        }
        let reset = self.inner.queue.retry_failed_actions()?;
        let mut report = self.inner.drain().await?;
        report.reset = reset;
        Ok(report)
    }
}

impl Inner {
    fn refresh_mode(&self) {
        let mode = OfflineMode::from_signals(
            self.network_available.load(Ordering::SeqCst),
            *self.channel.borrow(),
        );
        self.mode_tx.send_if_modified(|current| {
            if *current == mode {
                return false;
            }
            info!(from = %current, to = %mode, "Offline mode changed");
            *current = mode;
            true
        });
    }

    fn on_channel_connected(self: &Arc<Self>, previous: ConnectionStatus) {
        if self.queue.is_empty() {
            debug!(from = %previous, "Channel connected, nothing to replay");
            return;
        }
        info!(
            from = %previous,
            pending = self.queue.len(),
            "Channel connected, replaying offline queue"
        );
        Self::spawn_drain(self, "reconnect");
    }

    fn spawn_drain(self: &Arc<Self>, trigger: &'static str) {
        let inner = Arc::clone(self);
        self.scheduler.spawn(async move {
            match inner.drain().await {
                Ok(report) => debug!(trigger, replayed = report.replayed, "Replay finished"),
                Err(e) => warn!(trigger, error = %e, "Replay failed"),
            }
        });
    }

    async fn background_tick(&self) {
        if self.queue.is_empty() || !self.network_available.load(Ordering::SeqCst) {
            return;
        }
        if self.drain_lock.try_lock().is_err() {
            debug!("Replay already running, skipping background tick");
            return;
        }
        if let Err(e) = self.drain().await {
            warn!(error = %e, "Background replay failed");
        }
    }

    /// Replay the queue head-first until it is empty, a replay fails, or
    /// the head is exhausted.
    async fn drain(&self) -> SyncResult<SyncReport> {
        if !self.network_available.load(Ordering::SeqCst) {
            return Err(SyncError::Offline);
        }
        let _guard = self.drain_lock.lock().await;

        let mut report = SyncReport::default();
        while let Some(action) = self.queue.head() {
            if action.is_exhausted() {
                warn!(
                    id = %action.id,
                    retry_count = action.retry_count,
                    max_retries = action.max_retries,
                    "Replay blocked by exhausted action"
                );
                report.blocked_by = Some(action.id);
                break;
            }

            match self.replay(&action).await {
                Ok(_) => {
                    self.queue.complete(&action.id)?;
                    report.replayed += 1;
                    debug!(id = %action.id, path = %action.action, "Replayed action");
                }
                Err(e) => {
                    report.failed += 1;
                    // A rejected request will not succeed on replay.
                    let updated = if e.code.is_client_error() {
                        self.queue.mark_exhausted(&action.id)?
                    } else {
                        self.queue.mark_failed(&action.id)?
                    };
                    warn!(
                        id = %action.id,
                        code = %e.code,
                        error = %e.message,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        "Replay failed, stopping pass"
                    );
                    break;
                }
            }
        }

        report.remaining = self.queue.len();
        self.stats_tx.send_modify(|stats| {
            stats.passes += 1;
            stats.replayed += report.replayed as u64;
            stats.failed += report.failed as u64;
            stats.remaining = report.remaining;
        });
        info!(
            replayed = report.replayed,
            failed = report.failed,
            remaining = report.remaining,
            "Sync pass complete"
        );
        Ok(report)
    }

    async fn replay(&self, action: &QueuedAction) -> ApiResult {
        let body = (!action.data.is_null()).then(|| action.data.clone());
        let request = ApiRequest::new(action.method, action.action.as_str()).with_body(body);
        let options = RequestOptions::new()
            .header(IDEMPOTENCY_HEADER, action.id.as_str())
            .skip_dedup();
        self.api.request(request, options).await
    }

    fn enqueue(&self, action: QueuedAction, reason: &str) -> ApiResult<WriteOutcome> {
        let queued = self.queue.enqueue(action).map_err(ApiError::from)?;
        info!(id = %queued.id, path = %queued.action, reason, "Write queued for replay");
        Ok(WriteOutcome::Queued(queued))
    }

    fn cached_or_unavailable(&self, key: &str) -> ApiResult {
        match self.queue.get_cached_response(key) {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(ApiError::offline_unavailable(key)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tradelink_api::{ApiConfig, MockTransport, TransportError};
    use tradelink_core::ErrorCode;
    use tradelink_offline::OfflineConfig;

    struct Harness {
        sync: SyncCoordinator,
        transport: Arc<MockTransport>,
        queue: Arc<OfflineQueue>,
        channel: watch::Sender<ConnectionStatus>,
    }

    fn harness(status: ConnectionStatus, config: SyncConfig) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let api = ApiClient::with_transport(
            ApiConfig {
                base_url: "http://backend.test/api".to_string(),
                max_retries: 0,
                dedup_window_ms: 0,
                ..Default::default()
            },
            transport.clone(),
        );
        let queue = Arc::new(OfflineQueue::from_config(OfflineConfig::default()).unwrap());
        let (channel, rx) = watch::channel(status);
        let sync = SyncCoordinator::new(api, queue.clone(), rx, config);
        Harness {
            sync,
            transport,
            queue,
            channel,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn paths(transport: &MockTransport) -> Vec<String> {
        transport
            .requests()
            .iter()
            .map(|r| r.url.trim_start_matches("http://backend.test/api").to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_trade_write_queued_then_replayed() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.sync.init();
        h.sync.set_network_available(false);

        let outcome = h
            .sync
            .write(ActionType::Trade, HttpMethod::Post, "/orders", json!({"qty": 1}))
            .await
            .unwrap();
        let WriteOutcome::Queued(action) = outcome else {
            panic!("expected queued write");
        };
        assert_eq!(action.max_retries, 5);
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.transport.call_count(), 0);

        h.sync.set_network_available(true);
        wait_until(|| h.queue.is_empty()).await;

        let requests = h.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header(IDEMPOTENCY_HEADER), Some(action.id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_in_fifo_order() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.sync.init();
        h.channel.send_replace(ConnectionStatus::Reconnecting);

        h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();
        h.queue.queue_action(ActionType::Config, "/b", json!({})).unwrap();
        h.queue.queue_action(ActionType::System, "/c", Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.call_count(), 0);

        h.channel.send_replace(ConnectionStatus::Connected);
        wait_until(|| h.queue.is_empty()).await;
        assert_eq!(paths(&h.transport), vec!["/a", "/b", "/c"]);
        assert!(h.transport.requests()[2].body.is_none());
        // Automatic passes feed the totals too.
        let stats = h.sync.stats();
        assert_eq!(stats.replayed, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.remaining, 0);
        assert!(stats.passes >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_replays_persisted_actions() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();

        h.sync.init();
        wait_until(|| h.queue.is_empty()).await;
        assert_eq!(h.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_increments_retry_and_stops_pass() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        let first = h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();
        h.queue.queue_action(ActionType::Trade, "/b", json!({})).unwrap();
        h.transport.push_json(503, json!({"error": "busy"}));

        let report = h.sync.sync_now().await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(h.transport.call_count(), 1);

        let head = h.queue.head().unwrap();
        assert_eq!(head.id, first.id);
        assert_eq!(head.retry_count, 1);

        let report = h.sync.sync_now().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert!(h.queue.is_empty());
        assert_eq!(paths(&h.transport), vec!["/a", "/a", "/b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_head_blocks_until_reset() {
        let h = harness(ConnectionStatus::Reconnecting, SyncConfig::default());
        let mut action = QueuedAction::new(ActionType::System, "/a", json!({}));
        action.max_retries = 1;
        let action = h.queue.enqueue(action).unwrap();
        h.queue.queue_action(ActionType::Trade, "/b", json!({})).unwrap();

        h.transport.push_json(500, json!({}));
        h.sync.sync_now().await.unwrap();
        assert!(h.queue.head().unwrap().is_exhausted());

        let report = h.sync.sync_now().await.unwrap();
        assert_eq!(report.blocked_by.as_deref(), Some(action.id.as_str()));
        assert_eq!(report.remaining, 2);
        assert_eq!(h.transport.call_count(), 1);

        assert!(matches!(
            h.sync.retry_failed_actions().await,
            Err(SyncError::NotConnected)
        ));

        h.channel.send_replace(ConnectionStatus::Connected);
        let report = h.sync.retry_failed_actions().await.unwrap();
        assert_eq!(report.reset, 1);
        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_on_replay_exhausts_action() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();
        h.transport.push_json(422, json!({"message": "market closed"}));

        let report = h.sync.sync_now().await.unwrap();
        assert_eq!(report.failed, 1);
        let head = h.queue.head().unwrap();
        assert!(head.is_exhausted());
        assert_eq!(head.retry_count, head.max_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now_refused_while_offline() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.sync.set_network_available(false);
        assert!(matches!(h.sync.sync_now().await, Err(SyncError::Offline)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_write_sent_with_idempotency_key() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.transport.push_json(201, json!({"order_id": "o-1"}));

        let outcome = h
            .sync
            .write(ActionType::Trade, HttpMethod::Post, "/orders", json!({"qty": 1}))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Sent(json!({"order_id": "o-1"})));
        assert!(h.transport.requests()[0].header(IDEMPOTENCY_HEADER).is_some());
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_network_failure_is_queued() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.transport
            .push_response(Err(TransportError::Network("connection refused".into())));

        let outcome = h
            .sync
            .write(ActionType::Config, HttpMethod::Put, "/settings", json!({"theme": "dark"}))
            .await
            .unwrap();
        let WriteOutcome::Queued(action) = outcome else {
            panic!("expected queued write");
        };
        assert_eq!(action.method, HttpMethod::Put);
        assert_eq!(action.max_retries, 3);
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_client_error_is_returned_not_queued() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.transport.push_json(400, json!({"message": "bad qty"}));

        let err = h
            .sync
            .write(ActionType::Trade, HttpMethod::Post, "/orders", json!({"qty": -1}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Http(400));
        assert!(h.queue.is_empty());

        let err = h
            .sync
            .write(ActionType::Trade, HttpMethod::Get, "/orders", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_through_cache_and_offline_fallback() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.transport.push_json(200, json!({"px": 1}));

        let params = Some(json!({"symbol": "BTC"}));
        let data = h.sync.read("/prices", params.clone()).await.unwrap();
        assert_eq!(data, json!({"px": 1}));

        h.sync.set_network_available(false);
        assert_eq!(h.sync.read("/prices", params).await.unwrap(), json!({"px": 1}));
        assert_eq!(h.transport.call_count(), 1);

        let err = h.sync.read("/positions", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::OfflineUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_network_error_falls_back_to_cache() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.transport.push_json(200, json!([1, 2]));
        h.sync.read("/history", None).await.unwrap();

        h.transport
            .push_response(Err(TransportError::Network("reset".into())));
        assert_eq!(h.sync.read("/history", None).await.unwrap(), json!([1, 2]));

        h.transport.push_json(404, json!({}));
        let err = h.sync.read("/history", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Http(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_follows_signals() {
        let h = harness(ConnectionStatus::Disconnected, SyncConfig::default());
        h.sync.init();
        assert_eq!(h.sync.mode(), OfflineMode::Limited);
        assert!(!h.sync.offline_capabilities().can_execute_trades);

        let mut modes = h.sync.watch_mode();
        h.channel.send_replace(ConnectionStatus::Connected);
        modes.changed().await.unwrap();
        assert_eq!(*modes.borrow_and_update(), OfflineMode::Full);
        assert!(h.sync.offline_capabilities().can_execute_trades);

        h.sync.set_network_available(false);
        assert_eq!(h.sync.mode(), OfflineMode::ReadOnly);
        assert!(!h.sync.offline_capabilities().can_modify_settings);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_reacting_to_channel() {
        let h = harness(ConnectionStatus::Connected, SyncConfig::default());
        h.sync.init();
        h.sync.destroy();
        h.sync.destroy();

        h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();
        h.channel.send_replace(ConnectionStatus::Reconnecting);
        h.channel.send_replace(ConnectionStatus::Connected);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sync_replays_periodically() {
        let config = SyncConfig {
            background_sync: true,
            background_interval_ms: 1_000,
        };
        let h = harness(ConnectionStatus::Connected, config);
        h.sync.init();

        h.queue.queue_action(ActionType::Trade, "/a", json!({})).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.queue.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(h.queue.is_empty());
    }
}
