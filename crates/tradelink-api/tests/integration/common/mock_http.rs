//! Mock HTTP backend for integration testing.
//!
//! Routes:
//! - `GET /test`: counts hits, returns `{"hits": n, "query": ...}` after a short delay
//! - `GET /text`: plain-text body
//! - `GET /flaky`: 503 for the first two hits, then 200
//! - `GET /bad-json`: declares JSON, sends garbage
//! - `GET /missing`: 404 with a message
//! - `POST /echo`: echoes body and selected headers
//! - `POST /auth/login`, `POST /auth/logout`

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Hits {
    test: AtomicU32,
    flaky: AtomicU32,
}

/// Mock HTTP server bound to an ephemeral port.
pub struct MockHttpServer {
    addr: SocketAddr,
    hits: Arc<Hits>,
    handle: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        let hits = Arc::new(Hits::default());
        let app = Router::new()
            .route("/api/test", get(test_handler))
            .route("/api/text", get(|| async { "plain text" }))
            .route("/api/flaky", get(flaky_handler))
            .route("/api/bad-json", get(bad_json_handler))
            .route("/api/missing", get(missing_handler))
            .route("/api/echo", post(echo_handler))
            .route("/api/auth/login", post(login_handler))
            .route("/api/auth/logout", post(|| async { Json(json!({"ok": true})) }))
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, hits, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn test_hits(&self) -> u32 {
        self.hits.test.load(Ordering::SeqCst)
    }

    pub fn flaky_hits(&self) -> u32 {
        self.hits.flaky.load(Ordering::SeqCst)
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn test_handler(
    State(hits): State<Arc<Hits>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let n = hits.test.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(100)).await;
    Json(json!({"hits": n, "query": query}))
}

async fn flaky_handler(State(hits): State<Arc<Hits>>) -> impl IntoResponse {
    let n = hits.flaky.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= 2 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "try later"})),
        )
    } else {
        (StatusCode::OK, Json(json!({"attempt": n})))
    }
}

async fn bad_json_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "{oops")
}

async fn missing_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "no such resource"})),
    )
}

async fn echo_handler(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "body": body,
        "authorization": header("authorization"),
        "idempotency_key": header("idempotency-key"),
    }))
}

async fn login_handler(Json(body): Json<Value>) -> impl IntoResponse {
    if body.get("password").and_then(Value::as_str) == Some("secret") {
        (StatusCode::OK, Json(json!({"token": "tok-123"})))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "bad credentials"})),
        )
    }
}
