//! Reconnect replay ordering across the channel and the sync coordinator.
//!
//! A queued write must only be replayed once the fresh socket carries every
//! subscription again.

mod integration;
use integration::common::mock_ws::MockWsServer;

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tradelink_api::{
    ApiClient, ApiConfig, BoxFuture, HttpRequest, HttpResponse, HttpTransport, MockTransport,
    TransportError,
};
use tradelink_core::{ActionType, ConnectionStatus};
use tradelink_offline::{OfflineConfig, OfflineQueue};
use tradelink_sync::{SyncConfig, SyncCoordinator};
use tradelink_ws::{ConnectionConfig, ConnectionManager};

macro_rules! eventually {
    ($cond:expr) => {
        timeout(Duration::from_secs(5), async {
            loop {
                if $cond {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect(concat!("timed out waiting for: ", stringify!($cond)))
    };
}

/// Records the channel status seen by each outgoing request.
struct StatusRecordingTransport {
    inner: MockTransport,
    connection: ConnectionManager,
    seen: Mutex<Vec<(String, ConnectionStatus, usize)>>,
}

impl HttpTransport for StatusRecordingTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            // Connected is published only after the restore writes returned.
            self.seen.lock().push((
                request.url.clone(),
                self.connection.status(),
                self.connection.subscriptions().len(),
            ));
            self.inner.execute(request).await
        })
    }
}

fn kinds_and_topics(messages: &[String]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter_map(|m| serde_json::from_str::<Value>(m).ok())
        .map(|v| {
            (
                v["kind"].as_str().unwrap_or_default().to_string(),
                v["data"]["channel"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_replay_after_reconnect_follows_restored_subscriptions() {
    let server = MockWsServer::start().await;
    let connection = ConnectionManager::new(ConnectionConfig {
        url: server.url(),
        connect_timeout_ms: 1_000,
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 500,
        max_reconnect_attempts: 5,
        ..Default::default()
    });
    connection.subscribe("trading", None);
    connection.subscribe("prices", Some(json!({"symbols": ["BTC"]})));
    assert_ok!(connection.connect().await);
    eventually!(server.received_of_kind("SUBSCRIBE").await.len() == 2);

    let transport = Arc::new(StatusRecordingTransport {
        inner: MockTransport::new(),
        connection: connection.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let api = ApiClient::with_transport(
        ApiConfig {
            base_url: "http://backend.test/api".to_string(),
            max_retries: 0,
            ..Default::default()
        },
        transport.clone(),
    );
    let queue = Arc::new(OfflineQueue::from_config(OfflineConfig::default()).unwrap());
    let sync = SyncCoordinator::new(
        api,
        queue.clone(),
        connection.watch_state(),
        SyncConfig::default(),
    );
    sync.init();

    let action = queue
        .queue_action(ActionType::Trade, "/orders", json!({"qty": 1}))
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(transport.seen.lock().is_empty());

    server.drop_all().await;
    eventually!(server.connection_count().await == 2);
    eventually!(queue.is_empty());

    let seen = transport.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "http://backend.test/api/orders");
    assert_eq!(seen[0].1, ConnectionStatus::Connected);
    assert_eq!(seen[0].2, 2);
    assert_eq!(
        transport.inner.requests()[0].header("Idempotency-Key"),
        Some(action.id.as_str())
    );

    // The new socket opened with the subscriptions, in registration order.
    eventually!(server.received_of_kind("SUBSCRIBE").await.len() == 4);
    let frames = kinds_and_topics(&server.received_messages().await);
    assert_eq!(
        frames[2..4].to_vec(),
        vec![
            ("SUBSCRIBE".to_string(), "trading".to_string()),
            ("SUBSCRIBE".to_string(), "prices".to_string()),
        ]
    );
    assert_eq!(sync.stats().replayed, 1);

    sync.destroy();
    connection.destroy();
    server.shutdown().await;
}
