//! Request/response client for tradelink.
//!
//! Provides an `ApiClient` with:
//! - URL building from base address, path and query parameters
//! - Bearer auth, login/logout
//! - Request and response interceptor chains
//! - Retries with exponential backoff for network, timeout and 5xx errors
//! - Per-request timeout and caller cancellation
//! - Deduplication of concurrent identical GETs with a short result window
//!
//! Every call returns an `ApiResult`; nothing is thrown to the caller.

pub mod client;
pub mod config;
pub mod dedup;
pub mod interceptor;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod request;
pub mod transport;

pub use client::{ApiClient, ApiStats};
pub use config::ApiConfig;
pub use dedup::RequestDeduplicator;
pub use interceptor::{InterceptorChain, InterceptorId, RequestInterceptor, ResponseInterceptor};
pub use request::{build_url, ApiRequest, RequestOptions};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
pub use transport::{
    BoxFuture, DynTransport, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    TransportError,
};
