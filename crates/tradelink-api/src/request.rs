//! Request description and URL building.

use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tradelink_core::{ApiError, ApiResult, HttpMethod};

/// Logical request before transport resolution.
///
/// Interceptors receive a mutable reference and may rewrite any field.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Query parameters (JSON object). Arrays repeat the key; nulls are dropped.
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: None,
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Identity of a request for deduplication: `METHOD:path:params`.
    pub fn dedup_key(&self) -> String {
        let params = self
            .params
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok())
            .unwrap_or_default();
        format!("{}:{}:{}", self.method, self.path, params)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, applied after interceptors.
    pub headers: Vec<(String, String)>,
    /// Overrides the configured per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Cancelling resolves the call with `CANCELLED`.
    pub cancel: Option<CancellationToken>,
    /// Bypass GET deduplication.
    pub skip_dedup: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn skip_dedup(mut self) -> Self {
        self.skip_dedup = true;
        self
    }
}

/// Build the absolute URL for `path` under `base`.
///
/// Absolute `http(s)://` paths bypass the base.
pub fn build_url(base: &str, path: &str, params: Option<&Value>) -> ApiResult<String> {
    let joined = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut url =
        Url::parse(&joined).map_err(|e| ApiError::validation(format!("invalid URL {joined}: {e}")))?;

    let pairs = match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => {
            let mut pairs = Vec::new();
            for (key, value) in map {
                match value {
                    Value::Null => {}
                    Value::Array(items) => {
                        for item in items.iter().filter(|v| !v.is_null()) {
                            pairs.push((key.clone(), param_value(item)));
                        }
                    }
                    other => pairs.push((key.clone(), param_value(other))),
                }
            }
            pairs
        }
        Some(other) => {
            return Err(ApiError::validation(format!(
                "query params must be an object, got {other}"
            )))
        }
    };

    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url.into())
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "http://localhost:8080/api";

    #[test]
    fn test_build_url_joins_base_and_path() {
        assert_eq!(
            build_url(BASE, "/positions", None).unwrap(),
            "http://localhost:8080/api/positions"
        );
        assert_eq!(
            build_url("http://localhost:8080/api/", "positions", None).unwrap(),
            "http://localhost:8080/api/positions"
        );
    }

    #[test]
    fn test_build_url_params_repeat_arrays_and_drop_nulls() {
        let url = build_url(
            BASE,
            "/orders",
            Some(&json!({"symbol": ["BTC", "ETH"], "limit": 10, "cursor": null, "q": "a b"})),
        )
        .unwrap();
        assert_eq!(
            url,
            "http://localhost:8080/api/orders?symbol=BTC&symbol=ETH&limit=10&q=a+b"
        );
    }

    #[test]
    fn test_build_url_absolute_path() {
        assert_eq!(
            build_url(BASE, "https://other.example.com/x", None).unwrap(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_build_url_rejects_non_object_params() {
        let err = build_url(BASE, "/x", Some(&json!([1, 2]))).unwrap_err();
        assert_eq!(err.code, tradelink_core::ErrorCode::Validation);
    }

    #[test]
    fn test_dedup_key_includes_params() {
        let a = ApiRequest::new(HttpMethod::Get, "/test").with_params(Some(json!({"id": 1})));
        let b = ApiRequest::new(HttpMethod::Get, "/test").with_params(Some(json!({"id": 2})));
        assert_eq!(a.dedup_key(), "GET:/test:{\"id\":1}");
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(ApiRequest::new(HttpMethod::Get, "/test").dedup_key(), "GET:/test:");
    }
}
