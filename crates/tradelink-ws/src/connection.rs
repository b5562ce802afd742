//! Persistent-channel connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, heartbeat and subscription restoration after reconnection.
//!
//! Status transitions are published on a `watch` channel. Subscriptions are
//! re-sent on the fresh socket before the status becomes `Connected`, so no
//! other outbound traffic can precede them.

use crate::config::ConnectionConfig;
use crate::dispatcher::{Dispatcher, HandlerError, HandlerId, MessageHandler};
use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatManager, HeartbeatStats};
use crate::subscription::SubscriptionRegistry;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tradelink_core::{
    backoff_delay, ConnectionState, ConnectionStatus, ControlKind, MessageEnvelope, Scheduler,
    Subscription,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outcome of one open attempt, shared by every concurrent `connect()` caller.
type AttemptFuture = Shared<BoxFuture<'static, Result<(), String>>>;

struct Inner {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    status_tx: watch::Sender<ConnectionStatus>,
    subscriptions: SubscriptionRegistry,
    dispatcher: Dispatcher,
    heartbeat: HeartbeatManager,
    scheduler: Scheduler,
    /// Outbound queue of the session, installed when subscription restore
    /// starts. `None` while no socket is open.
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<Option<AttemptFuture>>,
    reconnect_timer: Mutex<Option<CancellationToken>>,
    /// Set by `disconnect()`; suppresses auto-reconnect.
    manual_close: AtomicBool,
    /// Bumped per attempt and on disconnect; stale sessions compare against it.
    generation: AtomicU64,
}

/// Persistent-channel connection manager.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a new connection manager. Nothing connects until `connect()`.
    pub fn new(config: ConnectionConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let heartbeat = HeartbeatManager::new(config.heartbeat_interval());
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ConnectionState::default()),
                status_tx,
                subscriptions: SubscriptionRegistry::new(),
                dispatcher: Dispatcher::new(),
                heartbeat,
                scheduler: Scheduler::new("connection"),
                outbound: RwLock::new(None),
                pending: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                manual_close: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Open the channel.
    ///
    /// Returns immediately when already connected. While an attempt is in
    /// flight every caller awaits that same attempt. A manual call resets
    /// the reconnect attempt counter.
    pub async fn connect(&self) -> WsResult<()> {
        let inner = &self.inner;
        if inner.status() == ConnectionStatus::Connected {
            return Ok(());
        }

        if inner.pending.lock().is_none() {
            inner.manual_close.store(false, Ordering::SeqCst);
            if let Some(timer) = inner.reconnect_timer.lock().take() {
                timer.cancel();
            }
            inner.state.write().reconnect_attempts = 0;
            inner.set_status(ConnectionStatus::Connecting);
        }

        Inner::start_attempt(inner)
            .await
            .map_err(WsError::ConnectionFailed)
    }

    /// Close the channel and suppress auto-reconnect. Idempotent.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.manual_close.store(true, Ordering::SeqCst);
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.pending.lock().take();
        if let Some(timer) = inner.reconnect_timer.lock().take() {
            timer.cancel();
        }

        let was_open = inner.outbound.write().take().is_some();
        inner.scheduler.cancel_all();
        if was_open {
            inner.state.write().last_disconnected_at = Some(Utc::now());
        }

        let previous = inner.status();
        inner.set_status(ConnectionStatus::Disconnected);
        if previous != ConnectionStatus::Disconnected {
            info!(from = %previous, "Persistent channel disconnected");
        }
    }

    /// Disconnect and drop every handler and subscription. Idempotent.
    pub fn destroy(&self) {
        self.disconnect();
        self.inner.dispatcher.clear();
        self.inner.subscriptions.clear();
        debug!("Connection manager destroyed");
    }

    /// Send an envelope on the live channel.
    ///
    /// Returns false (and logs) when not connected; nothing is queued.
    pub fn send(&self, envelope: &MessageEnvelope) -> bool {
        let status = self.inner.status();
        if status != ConnectionStatus::Connected {
            warn!(kind = %envelope.kind, status = %status, "Send while not connected, dropping");
            return false;
        }
        let sent = self.inner.enqueue(envelope);
        if !sent {
            warn!(kind = %envelope.kind, "Send failed, channel closing");
        }
        sent
    }

    /// Register a topic. Sent now when connected and on every reconnect.
    ///
    /// The registry changes under the session lock, so a topic added while
    /// subscriptions are being restored lands either in the restore snapshot
    /// or in the session's outbound queue, never neither.
    pub fn subscribe(&self, topic: &str, params: Option<Value>) {
        let envelope = MessageEnvelope::subscribe(topic, params.as_ref());
        let outbound = self.inner.outbound.read();
        self.inner.subscriptions.add(topic, params);
        if let Some(tx) = outbound.as_ref() {
            push(tx, &envelope);
        }
    }

    /// Drop a topic. Returns whether it was registered.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let outbound = self.inner.outbound.read();
        let removed = self.inner.subscriptions.remove(topic);
        if let (true, Some(tx)) = (removed, outbound.as_ref()) {
            push(tx, &MessageEnvelope::unsubscribe(topic));
        }
        removed
    }

    /// Register `callback` for a message kind or `channel:<name>` key.
    pub fn on<F>(&self, key: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(key, callback)
    }

    /// Register a fallible callback; an `Err` is logged and skipped.
    pub fn try_on<F>(&self, key: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&MessageEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.try_on(key, callback)
    }

    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        self.inner.dispatcher.add(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.dispatcher.off(id)
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status() == ConnectionStatus::Connected
    }

    /// Receiver of status transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Active subscriptions in insertion order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.list()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.inner.heartbeat.stats()
    }
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = std::mem::replace(&mut self.state.write().status, status);
        if previous != status {
            debug!(from = %previous, to = %status, "Connection status changed");
            self.status_tx.send_replace(status);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Join the in-flight attempt or start a new one.
    fn start_attempt(self: &Arc<Self>) -> AttemptFuture {
        let mut pending = self.pending.lock();
        if let Some(attempt) = pending.as_ref() {
            return attempt.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);
        self.scheduler.spawn(async move {
            let result = inner.open(generation).await.map_err(|e| e.to_string());
            inner.finish_attempt(generation, &result);
            let _ = tx.send(result);
        });

        let attempt = async move {
            rx.await
                .unwrap_or_else(|_| Err("connection attempt cancelled".to_string()))
        }
        .boxed()
        .shared();
        *pending = Some(attempt.clone());
        attempt
    }

    fn finish_attempt(self: &Arc<Self>, generation: u64, result: &Result<(), String>) {
        {
            let mut pending = self.pending.lock();
            if self.is_current(generation) {
                *pending = None;
            }
        }
        if let Err(message) = result {
            self.handle_failure(generation, message);
        }
    }

    async fn open(self: &Arc<Self>, generation: u64) -> WsResult<()> {
        let url = self.config.url.as_str();
        info!(url = %url, "Connecting to persistent channel");

        let connect = connect_async_tls_with_config(url, None, true, None);
        let (stream, _response) =
            match tokio::time::timeout(self.config.connect_timeout(), connect).await {
                Ok(result) => result?,
                Err(_) => return Err(WsError::Timeout(self.config.connect_timeout_ms)),
            };

        if !self.is_current(generation) {
            debug!("Connection attempt superseded, dropping socket");
            return Err(WsError::ConnectionFailed("attempt superseded".to_string()));
        }

        let (mut write, read) = stream.split();

        // Install the session queue and snapshot the registry together. The
        // queue is only drained once the restore below has been written.
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = {
            let mut outbound = self.outbound.write();
            *outbound = Some(tx.clone());
            self.subscriptions.list()
        };

        if let Err(e) = self.restore_subscriptions(&mut write, &subscriptions).await {
            self.release_outbound(&tx);
            return Err(e);
        }

        if !self.is_current(generation) {
            self.release_outbound(&tx);
            return Err(WsError::ConnectionFailed("attempt superseded".to_string()));
        }
        drop(tx);

        {
            let mut state = self.state.write();
            state.reconnect_attempts = 0;
            state.last_connected_at = Some(Utc::now());
            state.last_error = None;
        }
        self.heartbeat.reset();
        self.set_status(ConnectionStatus::Connected);
        info!(url = %url, "Persistent channel connected");

        let inner = Arc::clone(self);
        self.scheduler
            .spawn(async move { inner.run_session(generation, write, read, rx).await });
        Ok(())
    }

    /// Re-send every subscription, in insertion order, on a fresh socket.
    async fn restore_subscriptions(
        &self,
        write: &mut WsSink,
        subscriptions: &[Subscription],
    ) -> WsResult<()> {
        if subscriptions.is_empty() {
            return Ok(());
        }

        info!(count = subscriptions.len(), "Restoring subscriptions");
        for sub in subscriptions {
            let text = MessageEnvelope::subscribe(&sub.topic, sub.params.as_ref()).to_json()?;
            write
                .send(Message::Text(text))
                .await
                .map_err(|e| WsError::SendFailed(format!("subscribe {}: {e}", sub.topic)))?;
            debug!(topic = %sub.topic, "Subscription sent");
        }
        Ok(())
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        mut write: WsSink,
        mut read: WsSource,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) {
        // interval_at panics on a zero period.
        let period = self.heartbeat.interval().max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (code, reason): (u16, String) = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break (1006, format!("pong send failed: {e}"));
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1005, "no status".to_string()));
                        }
                        Some(Ok(_)) => self.heartbeat.record_message(),
                        Some(Err(e)) => break (1006, e.to_string()),
                        None => break (1006, "stream ended".to_string()),
                    }
                }

                out = outbound.recv() => {
                    match out {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                break (1006, format!("send failed: {e}"));
                            }
                        }
                        // Sender dropped by disconnect().
                        None => return,
                    }
                }

                _ = heartbeat.tick() => self.send_heartbeat(&mut write).await,
            }
        };

        self.on_session_closed(generation, code, reason);
    }

    async fn send_heartbeat(&self, write: &mut WsSink) {
        let text = match MessageEnvelope::ping().to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode heartbeat");
                return;
            }
        };
        match write.send(Message::Text(text)).await {
            Ok(()) => {
                self.heartbeat.record_ping();
                debug!("Sent heartbeat ping");
            }
            Err(e) => warn!(error = %e, "Heartbeat send failed"),
        }
    }

    fn handle_text(&self, text: &str) {
        self.heartbeat.record_message();

        let envelope = match MessageEnvelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping malformed message");
                return;
            }
        };

        match envelope.control_kind() {
            Some(ControlKind::Pong) => {
                self.heartbeat.record_pong();
                return;
            }
            Some(ControlKind::Ping) => {
                self.enqueue(&MessageEnvelope::new(ControlKind::Pong.as_str(), Value::Null));
                return;
            }
            _ => {}
        }

        self.dispatcher.dispatch(&envelope);
    }

    /// Queue a frame on the live session.
    fn enqueue(&self, envelope: &MessageEnvelope) -> bool {
        match self.outbound.read().as_ref() {
            Some(tx) => push(tx, envelope),
            None => false,
        }
    }

    /// Clear the session queue if it is still `tx`.
    fn release_outbound(&self, tx: &mpsc::UnboundedSender<Message>) {
        let mut outbound = self.outbound.write();
        if outbound.as_ref().is_some_and(|current| current.same_channel(tx)) {
            *outbound = None;
        }
    }

    fn on_session_closed(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        if !self.is_current(generation) {
            return;
        }
        *self.outbound.write() = None;
        {
            let mut state = self.state.write();
            state.last_disconnected_at = Some(Utc::now());
            state.last_error = Some(
                WsError::ConnectionClosed {
                    code,
                    reason: reason.clone(),
                }
                .to_string(),
            );
        }

        if self.manual_close.load(Ordering::SeqCst) {
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        warn!(code, reason = %reason, "Persistent channel closed unexpectedly");
        self.schedule_reconnect();
    }

    fn handle_failure(self: &Arc<Self>, generation: u64, message: &str) {
        if !self.is_current(generation) || self.manual_close.load(Ordering::SeqCst) {
            return;
        }
        self.state.write().last_error = Some(message.to_string());
        self.set_status(ConnectionStatus::Error);
        error!(error = %message, "Connection attempt failed");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.manual_close.load(Ordering::SeqCst) {
            return;
        }

        let max_attempts = self.config.max_reconnect_attempts;
        let attempt = {
            let mut state = self.state.write();
            if state.reconnect_attempts >= max_attempts {
                None
            } else {
                state.reconnect_attempts += 1;
                Some(state.reconnect_attempts)
            }
        };

        let Some(attempt) = attempt else {
            error!(max_attempts, "Max reconnection attempts reached");
            self.set_status(ConnectionStatus::Error);
            return;
        };

        let delay = backoff_delay(
            self.config.reconnect_base_delay(),
            self.config.reconnect_max_delay(),
            attempt,
        );
        self.set_status(ConnectionStatus::Reconnecting);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        let timer = self.scheduler.token();
        if let Some(previous) = self.reconnect_timer.lock().replace(timer.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(self);
        self.scheduler.spawn_after(delay, async move {
            if timer.is_cancelled() || inner.manual_close.load(Ordering::SeqCst) {
                return;
            }
            let _ = Inner::start_attempt(&inner).await;
        });
    }
}

/// Queue `envelope` on a session's outbound channel.
fn push(tx: &mpsc::UnboundedSender<Message>, envelope: &MessageEnvelope) -> bool {
    match envelope.to_json() {
        Ok(text) => tx.send(Message::Text(text)).is_ok(),
        Err(e) => {
            warn!(kind = %envelope.kind, error = %e, "Failed to encode envelope");
            false
        }
    }
}
