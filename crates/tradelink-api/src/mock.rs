//! Scripted `HttpTransport` for tests.
//!
//! Compiled for this crate's tests and, through the `test-util` feature, for
//! dependent crates' tests.

use crate::transport::{BoxFuture, HttpRequest, HttpResponse, HttpTransport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Scripted transport for tests.
///
/// Queued responses are returned in order; once drained, the default
/// response (200 `{}`) is returned.
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    default_response: Mutex<Result<HttpResponse, TransportError>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Duration>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(Ok(HttpResponse::json(200, &Value::Object(
                serde_json::Map::new(),
            )))),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Queue the next result.
    pub fn push_response(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push_response(Ok(HttpResponse::json(status, &body)));
    }

    /// Result returned once the queue is empty.
    pub fn set_default(&self, response: Result<HttpResponse, TransportError>) {
        *self.default_response.lock() = response;
    }

    /// Delay every exchange by `delay` before responding.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Requests seen so far, including ones still in flight.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            self.requests.lock().push(request);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().pop_front();
            match next {
                Some(response) => response,
                None => self.default_response.lock().clone(),
            }
        })
    }
}
