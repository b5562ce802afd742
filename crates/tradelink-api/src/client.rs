//! Request/response client.
//!
//! Every call resolves to an `ApiResult`. Network, timeout and 5xx failures
//! are retried with exponential backoff; 4xx responses and parse errors
//! return immediately.

use crate::config::ApiConfig;
use crate::dedup::RequestDeduplicator;
use crate::interceptor::{InterceptorChain, InterceptorId, RequestInterceptor, ResponseInterceptor};
use crate::request::{build_url, ApiRequest, RequestOptions};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tradelink_core::{backoff_delay, ApiError, ApiResult, ErrorCode, HttpMethod};

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApiStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    retry_attempts: AtomicU64,
}

struct ClientInner {
    config: ApiConfig,
    transport: Arc<dyn HttpTransport>,
    auth_token: RwLock<Option<String>>,
    interceptors: InterceptorChain,
    dedup: RequestDeduplicator,
    counters: Counters,
}

/// Cheaply cloneable handle; clones share state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Client over the default reqwest transport.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let transport =
            ReqwestTransport::new().map_err(|e| ApiError::network(e.to_string()))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ApiConfig, transport: Arc<dyn HttpTransport>) -> Self {
        info!(base_url = %config.base_url, "Creating API client");
        let dedup = RequestDeduplicator::new(config.dedup_window());
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                auth_token: RwLock::new(None),
                interceptors: InterceptorChain::new(),
                dedup,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub async fn get(&self, path: &str, params: Option<Value>) -> ApiResult {
        self.request(
            ApiRequest::new(HttpMethod::Get, path).with_params(params),
            RequestOptions::default(),
        )
        .await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> ApiResult {
        self.request(
            ApiRequest::new(HttpMethod::Post, path).with_body(body),
            RequestOptions::default(),
        )
        .await
    }

    pub async fn put(&self, path: &str, body: Option<Value>) -> ApiResult {
        self.request(
            ApiRequest::new(HttpMethod::Put, path).with_body(body),
            RequestOptions::default(),
        )
        .await
    }

    pub async fn patch(&self, path: &str, body: Option<Value>) -> ApiResult {
        self.request(
            ApiRequest::new(HttpMethod::Patch, path).with_body(body),
            RequestOptions::default(),
        )
        .await
    }

    pub async fn delete(&self, path: &str, params: Option<Value>) -> ApiResult {
        self.request(
            ApiRequest::new(HttpMethod::Delete, path).with_params(params),
            RequestOptions::default(),
        )
        .await
    }

    /// General entry point. GETs are deduplicated unless `skip_dedup` is set.
    pub async fn request(&self, request: ApiRequest, options: RequestOptions) -> ApiResult {
        let cancel = options.cancel.clone();

        if request.method == HttpMethod::Get && !options.skip_dedup {
            let key = request.dedup_key();
            let this = self.clone();
            let call = self.inner.dedup.run(&key, move || async move {
                this.execute(request, options).await
            });
            with_cancel(cancel, call).await
        } else {
            with_cancel(cancel, self.execute(request, options)).await
        }
    }

    async fn execute(&self, mut request: ApiRequest, options: RequestOptions) -> ApiResult {
        let counters = &self.inner.counters;
        counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let result = self.execute_with_retry(&mut request, &options).await;
        if let Err(e) = &result {
            counters.failed_requests.fetch_add(1, Ordering::Relaxed);
            debug!(
                method = %request.method,
                path = %request.path,
                code = %e.code,
                error = %e.message,
                "Request failed"
            );
        }
        result
    }

    async fn execute_with_retry(
        &self,
        request: &mut ApiRequest,
        options: &RequestOptions,
    ) -> ApiResult {
        let config = &self.inner.config;

        self.inner.interceptors.apply_request(request)?;
        for (name, value) in &options.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        if !request.has_header("Authorization") {
            if let Some(token) = self.inner.auth_token.read().as_ref() {
                request
                    .headers
                    .insert("Authorization".to_string(), format!("Bearer {token}"));
            }
        }

        let url = build_url(&config.base_url, &request.path, request.params.as_ref())?;
        let http = HttpRequest {
            method: request.method,
            url,
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: request.body.clone(),
        };
        let timeout = options.timeout.unwrap_or_else(|| config.timeout());

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&http, timeout).await {
                Ok(data) => return self.inner.interceptors.apply_response(request, data),
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    attempt += 1;
                    self.inner
                        .counters
                        .retry_attempts
                        .fetch_add(1, Ordering::Relaxed);
                    let delay = backoff_delay(
                        config.retry_base_delay(),
                        config.retry_max_delay(),
                        attempt,
                    );
                    warn!(
                        method = %http.method,
                        url = %http.url,
                        attempt,
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, http: &HttpRequest, timeout: Duration) -> ApiResult {
        let response =
            match tokio::time::timeout(timeout, self.inner.transport.execute(http.clone())).await {
                Err(_) => {
                    return Err(ApiError::timeout(format!(
                        "request timed out after {}ms",
                        timeout.as_millis()
                    )))
                }
                Ok(Err(TransportError::Timeout)) => {
                    return Err(ApiError::timeout("request timed out"))
                }
                Ok(Err(TransportError::Network(msg))) => return Err(ApiError::network(msg)),
                Ok(Ok(response)) => response,
            };

        if response.is_success() {
            parse_body(&response)
        } else {
            Err(status_error(&response))
        }
    }

    // ========== Auth ==========

    /// POST credentials to the login path and keep the returned token.
    pub async fn login(&self, credentials: Value) -> ApiResult {
        let path = self.inner.config.login_path.clone();
        let data = self
            .request(
                ApiRequest::new(HttpMethod::Post, path).with_body(Some(credentials)),
                RequestOptions::default(),
            )
            .await?;

        let token = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::parse("login response missing token"))?;
        *self.inner.auth_token.write() = Some(token.to_string());
        info!("Logged in");
        Ok(data)
    }

    /// Notify the backend (best effort) and drop the token.
    pub async fn logout(&self) {
        if !self.is_authenticated() {
            return;
        }
        let path = self.inner.config.logout_path.clone();
        if let Err(e) = self.post(&path, None).await {
            warn!(error = %e, "Logout request failed, clearing token anyway");
        }
        *self.inner.auth_token.write() = None;
        info!("Logged out");
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        *self.inner.auth_token.write() = token;
    }

    pub fn auth_token(&self) -> Option<String> {
        self.inner.auth_token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.auth_token.read().is_some()
    }

    // ========== Interceptors ==========

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        self.inner.interceptors.add_request(interceptor)
    }

    pub fn add_response_interceptor(
        &self,
        interceptor: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorId {
        self.inner.interceptors.add_response(interceptor)
    }

    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        self.inner.interceptors.remove(id)
    }

    // ========== Stats ==========

    pub fn stats(&self) -> ApiStats {
        let c = &self.inner.counters;
        ApiStats {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            failed_requests: c.failed_requests.load(Ordering::Relaxed),
            retry_attempts: c.retry_attempts.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.inner.counters;
        c.total_requests.store(0, Ordering::Relaxed);
        c.failed_requests.store(0, Ordering::Relaxed);
        c.retry_attempts.store(0, Ordering::Relaxed);
    }

    /// Calls currently shared through GET deduplication.
    pub fn in_flight(&self) -> usize {
        self.inner.dedup.in_flight()
    }

    /// Drop interceptors, dedup entries and the auth token.
    pub fn destroy(&self) {
        self.inner.interceptors.clear();
        self.inner.dedup.clear();
        *self.inner.auth_token.write() = None;
        debug!("API client destroyed");
    }
}

async fn with_cancel<F>(cancel: Option<CancellationToken>, call: F) -> ApiResult
where
    F: Future<Output = ApiResult>,
{
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(ApiError::cancelled()),
                result = call => result,
            }
        }
        None => call.await,
    }
}

/// Decode a 2xx body according to its declared content type.
fn parse_body(response: &HttpResponse) -> ApiResult {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }
    let is_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("json"));

    if is_json {
        serde_json::from_slice(&response.body)
            .map_err(|e| ApiError::parse(format!("invalid JSON response: {e}")))
    } else {
        String::from_utf8(response.body.clone())
            .map(Value::String)
            .map_err(|e| ApiError::parse(format!("invalid text response: {e}")))
    }
}

/// Error for a non-2xx response. The message comes from the body when present.
fn status_error(response: &HttpResponse) -> ApiError {
    let body: Option<Value> = serde_json::from_slice(&response.body).ok();
    let message = body
        .as_ref()
        .and_then(|b| {
            b.get("message")
                .and_then(Value::as_str)
                .or_else(|| b.get("error").and_then(Value::as_str))
                .or_else(|| {
                    b.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
        })
        .or_else(|| {
            std::str::from_utf8(&response.body)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", response.status));

    ApiError::new(ErrorCode::Http(response.status), message)
}
