//! Request and response interceptor chains.
//!
//! Interceptors run in registration order. A failing or panicking
//! interceptor turns the call into an error result; it never escapes.

use crate::request::ApiRequest;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use tradelink_core::{ApiError, ApiResult};

/// Rewrites an outgoing request.
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: &mut ApiRequest) -> ApiResult<()>;
}

/// Transforms a successful response payload.
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, request: &ApiRequest, data: Value) -> ApiResult<Value>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut ApiRequest) -> ApiResult<()> + Send + Sync,
{
    fn on_request(&self, request: &mut ApiRequest) -> ApiResult<()> {
        self(request)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&ApiRequest, Value) -> ApiResult<Value> + Send + Sync,
{
    fn on_response(&self, request: &ApiRequest, data: Value) -> ApiResult<Value> {
        self(request, data)
    }
}

/// Handle for removing a registered interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

#[derive(Default)]
pub struct InterceptorChain {
    next_id: AtomicU64,
    request: RwLock<Vec<(InterceptorId, Arc<dyn RequestInterceptor>)>>,
    response: RwLock<Vec<(InterceptorId, Arc<dyn ResponseInterceptor>)>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> InterceptorId {
        InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_request(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        let id = self.next_id();
        self.request.write().push((id, interceptor));
        id
    }

    pub fn add_response(&self, interceptor: Arc<dyn ResponseInterceptor>) -> InterceptorId {
        let id = self.next_id();
        self.response.write().push((id, interceptor));
        id
    }

    /// Remove from whichever chain holds `id`.
    pub fn remove(&self, id: InterceptorId) -> bool {
        let mut removed = false;
        self.request.write().retain(|(i, _)| {
            let keep = *i != id;
            removed |= !keep;
            keep
        });
        self.response.write().retain(|(i, _)| {
            let keep = *i != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub fn clear(&self) {
        self.request.write().clear();
        self.response.write().clear();
    }

    pub fn apply_request(&self, request: &mut ApiRequest) -> ApiResult<()> {
        // Snapshot so interceptors can register others without deadlocking.
        let chain: Vec<_> = self.request.read().iter().map(|(_, i)| i.clone()).collect();
        for interceptor in chain {
            match catch_unwind(AssertUnwindSafe(|| interceptor.on_request(request))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(path = %request.path, "Request interceptor panicked");
                    return Err(ApiError::unknown("request interceptor panicked"));
                }
            }
        }
        Ok(())
    }

    pub fn apply_response(&self, request: &ApiRequest, mut data: Value) -> ApiResult<Value> {
        let chain: Vec<_> = self.response.read().iter().map(|(_, i)| i.clone()).collect();
        for interceptor in chain {
            data = match catch_unwind(AssertUnwindSafe(|| interceptor.on_response(request, data))) {
                Ok(result) => result?,
                Err(_) => {
                    warn!(path = %request.path, "Response interceptor panicked");
                    return Err(ApiError::unknown("response interceptor panicked"));
                }
            };
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tradelink_core::{ErrorCode, HttpMethod};

    #[test]
    fn test_request_interceptors_run_in_order() {
        let chain = InterceptorChain::new();
        chain.add_request(Arc::new(|req: &mut ApiRequest| -> ApiResult<()> {
            req.headers.insert("X-Order".into(), "a".into());
            Ok(())
        }));
        chain.add_request(Arc::new(|req: &mut ApiRequest| -> ApiResult<()> {
            let prev = req.headers.get("X-Order").cloned().unwrap_or_default();
            req.headers.insert("X-Order".into(), format!("{prev}b"));
            Ok(())
        }));

        let mut req = ApiRequest::new(HttpMethod::Get, "/x");
        chain.apply_request(&mut req).unwrap();
        assert_eq!(req.headers.get("X-Order").map(String::as_str), Some("ab"));
    }

    #[test]
    fn test_panicking_interceptor_becomes_error() {
        let chain = InterceptorChain::new();
        chain.add_request(Arc::new(|_: &mut ApiRequest| -> ApiResult<()> {
            panic!("boom")
        }));

        let mut req = ApiRequest::new(HttpMethod::Get, "/x");
        let err = chain.apply_request(&mut req).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unknown);
    }

    #[test]
    fn test_response_interceptor_transforms_and_removes() {
        let chain = InterceptorChain::new();
        let id = chain.add_response(Arc::new(|_: &ApiRequest, data: Value| -> ApiResult<Value> {
            Ok(json!({"wrapped": data}))
        }));

        let req = ApiRequest::new(HttpMethod::Get, "/x");
        assert_eq!(
            chain.apply_response(&req, json!(1)).unwrap(),
            json!({"wrapped": 1})
        );

        assert!(chain.remove(id));
        assert!(!chain.remove(id));
        assert_eq!(chain.apply_response(&req, json!(1)).unwrap(), json!(1));
    }
}
