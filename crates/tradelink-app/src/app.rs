//! Application wiring and lifecycle.
//!
//! One instance of each component is built at startup and shared by
//! reference. `init()` starts them, `destroy()` releases every timer and
//! listener; both are idempotent so init/destroy cycles do not leak.

use crate::config::AppConfig;
use crate::error::AppResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tradelink_api::ApiClient;
use tradelink_core::{
    ConnectionState, ConnectionStatus, MessageEnvelope, Scheduler, CHANNEL_KEY_PREFIX,
};
use tradelink_offline::OfflineQueue;
use tradelink_sync::{OfflineCapabilities, SyncCoordinator, SyncReport, SyncResult};
use tradelink_telemetry::Metrics;
use tradelink_ws::{ConnectionManager, HandlerError, HandlerId, MessageHandler};

/// Interval for refreshing gauges that have no change feed.
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Counts inbound envelopes by kind.
struct MessageMetrics;

impl MessageHandler for MessageMetrics {
    fn can_handle(&self, key: &str) -> bool {
        // Once per envelope: the kind key, not the channel key.
        !key.starts_with(CHANNEL_KEY_PREFIX)
    }

    fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        Metrics::ws_message(&envelope.kind);
        Ok(())
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    api: ApiClient,
    connection: ConnectionManager,
    queue: Arc<OfflineQueue>,
    sync: SyncCoordinator,
    scheduler: Scheduler,
    metrics_handler: Mutex<Option<HandlerId>>,
    initialized: AtomicBool,
}

impl Application {
    /// Build every component. Nothing connects until `init()`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let api = ApiClient::new(config.api.clone())?;
        let queue = Arc::new(OfflineQueue::from_config(config.offline.clone())?);
        let connection = ConnectionManager::new(config.ws.clone());
        let sync = SyncCoordinator::new(
            api.clone(),
            queue.clone(),
            connection.watch_state(),
            config.sync.clone(),
        );

        info!(
            api = %config.api.base_url,
            ws = %config.ws.url,
            pending_actions = queue.len(),
            persistent = config.offline.storage_dir.is_some(),
            "Application created"
        );

        Ok(Self {
            config,
            api,
            connection,
            queue,
            sync,
            scheduler: Scheduler::new("app"),
            metrics_handler: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Start sync, metrics and the persistent channel. Idempotent.
    ///
    /// A failed first connection is not an error: the channel keeps
    /// reconnecting in the background and the mode reflects it.
    pub async fn init(&self) -> AppResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handler = self.connection.add_handler(Arc::new(MessageMetrics));
        *self.metrics_handler.lock() = Some(handler);

        self.sync.init();
        self.spawn_metrics();

        if let Err(e) = self.connection.connect().await {
            warn!(error = %e, "Initial connection failed, continuing degraded");
        }

        info!(
            status = %self.connection.status(),
            mode = %self.sync.mode(),
            "Application initialized"
        );
        Ok(())
    }

    /// Release every timer, listener and connection. Idempotent.
    pub fn destroy(&self) {
        self.scheduler.cancel_all();
        self.sync.destroy();
        self.connection.destroy();
        self.api.destroy();
        self.metrics_handler.lock().take();

        if self.initialized.swap(false, Ordering::SeqCst) {
            refresh_metrics(&self.api, &self.queue);
            info!("Application stopped");
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> AppResult<()> {
        self.init().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.destroy();
        Ok(())
    }

    fn spawn_metrics(&self) {
        let mut status_rx = self.connection.watch_state();
        self.scheduler.spawn(async move {
            let mut status = *status_rx.borrow_and_update();
            Metrics::connection_status(status);
            while status_rx.changed().await.is_ok() {
                let next = *status_rx.borrow_and_update();
                if next == ConnectionStatus::Reconnecting && status != ConnectionStatus::Reconnecting
                {
                    Metrics::ws_reconnect();
                }
                Metrics::connection_status(next);
                status = next;
            }
        });

        let mut mode_rx = self.sync.watch_mode();
        self.scheduler.spawn(async move {
            Metrics::offline_mode(mode_rx.borrow_and_update().as_str());
            while mode_rx.changed().await.is_ok() {
                Metrics::offline_mode(mode_rx.borrow_and_update().as_str());
            }
        });

        let mut stats_rx = self.sync.watch_stats();
        self.scheduler.spawn(async move {
            while stats_rx.changed().await.is_ok() {
                let stats = *stats_rx.borrow_and_update();
                Metrics::sync_totals(stats.replayed, stats.failed);
                Metrics::queue_depth(stats.remaining);
            }
        });

        let api = self.api.clone();
        let queue = Arc::clone(&self.queue);
        self.scheduler
            .spawn_interval(METRICS_REFRESH_INTERVAL, move || {
                refresh_metrics(&api, &queue);
                async {}
            });
    }

    // ========== Upward interface ==========

    /// Register a handler for a message kind or `channel:<name>`.
    pub fn on_message<F>(&self, key: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.connection.on(key, handler)
    }

    pub fn off_message(&self, id: HandlerId) -> bool {
        self.connection.off(id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn offline_capabilities(&self) -> OfflineCapabilities {
        self.sync.offline_capabilities()
    }

    pub fn subscribe(&self, topic: &str, params: Option<Value>) {
        self.connection.subscribe(topic, params);
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.connection.unsubscribe(topic)
    }

    /// Platform connectivity signal.
    pub fn set_network_available(&self, available: bool) {
        self.sync.set_network_available(available);
    }

    /// Replay the offline queue now. Metrics follow through the totals feed.
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        self.sync.sync_now().await
    }

    // ========== Components ==========

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }
}

fn refresh_metrics(api: &ApiClient, queue: &OfflineQueue) {
    let stats = api.stats();
    Metrics::api_totals(stats.total_requests, stats.failed_requests, stats.retry_attempts);
    Metrics::queue_depth(queue.len());
    Metrics::storage_usage(queue.storage_quota().usage);
    debug!(pending = queue.len(), "Metrics refreshed");
}
