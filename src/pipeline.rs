//! The request pipeline: the single choke point every outbound call passes
//! through.
//!
//! Per attempt: circuit-breaker gate, bearer-token injection, timeout
//! governor, outcome classification, breaker accounting, retry decision. The
//! facade in [`crate::client`] owns none of this logic; it only resolves the
//! target URL and delegates here.
//!
//! Cancellation is modeled as future drop: dropping the future returned by
//! [`Pipeline::dispatch`] aborts the in-flight transport call and any pending
//! retry sleep. Success/failure recording happens strictly after the awaited
//! transport completes, so a cancelled call records neither.

use crate::{
    auth::{TokenStore, UnauthorizedHook},
    breaker::{CircuitBreaker, CircuitState},
    error::CODE_UNAUTHORIZED,
    retry::RetryPolicy,
    Error, Result,
};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

/// Per-request options for calls made through [`crate::Client::call`].
///
/// Carries the method and path plus everything a call may override: extra
/// headers, query parameters, a backend port substituted into the base URL's
/// authority component, and a per-call timeout.
///
/// # Examples
///
/// ```
/// use breakwater::RequestOptions;
/// use http::Method;
///
/// let options = RequestOptions::new(Method::GET, "/drivers")
///     .with_query_param("page", "1")
///     .with_port(9200);
/// # let _ = options;
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// The HTTP method.
    pub method: Method,
    /// The request path, relative to the base URL.
    pub path: String,
    /// Additional headers for this request.
    pub headers: HeaderMap,
    /// Query parameters for this request.
    pub query_params: HashMap<String, String>,
    /// Backend port override for this call.
    pub port: Option<u16>,
    /// Timeout override for this call.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Creates options with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: HashMap::new(),
            port: None,
            timeout: None,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Overrides the backend port for this call.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Overrides the request timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves the effective URL against the given base.
    pub(crate) fn resolve(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.set_path(&self.path);
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|_| {
                Error::Configuration(format!("cannot override port on URL {base}"))
            })?;
        }
        for (key, value) in &self.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

/// Call-local state for one logical request across its retries.
#[derive(Debug)]
struct AttemptContext {
    method: Method,
    url: Url,
    timeout: Duration,
    /// Prior failed attempts; 0 on the first try.
    attempt: usize,
    /// Cumulative time spent sleeping between retries.
    total_delay: Duration,
}

/// Orchestrates every outbound call; owned by the facade, one per client.
pub(crate) struct Pipeline {
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    default_headers: HeaderMap,
    token_store: Option<Arc<dyn TokenStore>>,
    on_unauthorized: Option<UnauthorizedHook>,
    request_timeout: Duration,
}

impl Pipeline {
    pub(crate) fn new(
        http: reqwest::Client,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        default_headers: HeaderMap,
        token_store: Option<Arc<dyn TokenStore>>,
        on_unauthorized: Option<UnauthorizedHook>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            breaker,
            retry,
            default_headers,
            token_store,
            on_unauthorized,
            request_timeout,
        }
    }

    pub(crate) fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs one logical call to completion: circuit check, send, classify,
    /// record, retry.
    pub(crate) async fn dispatch<Req, Res>(
        &self,
        url: Url,
        method: Method,
        headers: &HeaderMap,
        body: Option<&Req>,
        timeout: Option<Duration>,
    ) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let mut ctx = AttemptContext {
            method,
            url,
            timeout: timeout.unwrap_or(self.request_timeout),
            attempt: 0,
            total_delay: Duration::ZERO,
        };

        loop {
            // Fail fast while the circuit is open: no network I/O, no retry.
            let state = self.breaker.evaluate();
            if matches!(state, CircuitState::Open | CircuitState::ForcedOpen) {
                tracing::warn!(
                    method = %ctx.method,
                    url = %ctx.url,
                    ?state,
                    "Circuit open, rejecting request"
                );
                return Err(Error::circuit_open());
            }

            let error = match self.send_attempt(&ctx, headers, body).await {
                Ok(response) if response.status().is_success() => {
                    self.breaker.record_success();
                    return self.decode(response, &ctx).await;
                }
                Ok(response) => {
                    let status = response.status();
                    let resp_headers = response.headers().clone();
                    let raw_body = response.text().await.unwrap_or_default();
                    classify_response(status, &resp_headers, &raw_body)
                }
                Err(e) => e,
            };

            // Only backend-unhealth evidence feeds the breaker; 4xx never does.
            if error.counts_against_breaker() {
                self.breaker.record_failure();
            }

            if error.code() == Some(CODE_UNAUTHORIZED) {
                if let Some(hook) = &self.on_unauthorized {
                    hook();
                }
            }

            tracing::warn!(
                error = %error,
                attempt = ctx.attempt + 1,
                method = %ctx.method,
                url = %ctx.url,
                "Request failed"
            );

            match self.retry.delay_for(&error, ctx.attempt) {
                Some(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = ctx.attempt + 1,
                        "Retrying request after delay"
                    );
                    tokio::time::sleep(delay).await;
                    ctx.attempt += 1;
                    ctx.total_delay += delay;
                }
                None => return Err(error),
            }
        }
    }

    /// Executes a single attempt under the timeout governor.
    async fn send_attempt<Req>(
        &self,
        ctx: &AttemptContext,
        headers: &HeaderMap,
        body: Option<&Req>,
    ) -> Result<reqwest::Response>
    where
        Req: Serialize,
    {
        tracing::debug!(
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.attempt + 1,
            "Executing HTTP request"
        );

        let mut request = self.http.request(ctx.method.clone(), ctx.url.clone());

        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }

        if let Some(store) = &self.token_store {
            if let Some(token) = store.token() {
                request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
        }

        if let Some(body) = body {
            let json =
                serde_json::to_value(body).map_err(|e| Error::Serialization(e.to_string()))?;
            request = request.json(&json);
        }

        match tokio::time::timeout(ctx.timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(Error::Timeout {
                elapsed: ctx.timeout,
            }),
            Ok(Err(e)) => Err(Error::Network(e)),
            Err(_) => Err(Error::Timeout {
                elapsed: ctx.timeout,
            }),
        }
    }

    /// Decodes a 2xx response body into the caller's type.
    async fn decode<Res>(&self, response: reqwest::Response, ctx: &AttemptContext) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        let status = response.status();
        tracing::info!(
            status = status.as_u16(),
            attempts = ctx.attempt + 1,
            total_delay_ms = ctx.total_delay.as_millis(),
            "Received HTTP response"
        );

        // The transport already succeeded (and was recorded); a failure while
        // draining the body is a decode problem, not fresh backend-unhealth
        // evidence, so it must not re-enter breaker accounting or the retry
        // loop as a network error.
        let raw_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read response body");
                return Err(Error::Deserialization {
                    raw_response: String::new(),
                    serde_error: format!("body read failed: {e}"),
                    status,
                });
            }
        };
        match serde_json::from_str::<Res>(&raw_body) {
            Ok(data) => Ok(data),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );
                Err(Error::Deserialization {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }
}

/// Maps a non-2xx response deterministically onto the error taxonomy.
///
/// - 400 becomes [`Error::Validation`] with server field details if present.
/// - 401 becomes the `UNAUTHORIZED` kind.
/// - 429 becomes [`Error::RateLimit`] with a parsed `Retry-After`.
/// - Everything else becomes [`Error::Api`], preferring a server-supplied
///   `message`/`code` over the canonical status text and `HTTP_<status>`.
pub(crate) fn classify_response(status: StatusCode, headers: &HeaderMap, raw_body: &str) -> Error {
    let body: Option<serde_json::Value> = serde_json::from_str(raw_body).ok();
    let server_message = body
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    let message = server_message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });

    match status {
        StatusCode::BAD_REQUEST => {
            tracing::error!(status = status.as_u16(), response = %raw_body, "Validation error");
            let details = body
                .as_ref()
                .and_then(|v| v.get("details").or_else(|| v.get("errors")))
                .cloned();
            Error::Validation { message, details }
        }
        StatusCode::UNAUTHORIZED => Error::unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimit {
            retry_after: parse_retry_after(headers),
        },
        _ => {
            if status.is_server_error() {
                tracing::warn!(status = status.as_u16(), response = %raw_body, "Server error (5xx)");
            } else {
                tracing::error!(status = status.as_u16(), response = %raw_body, "Client error (4xx)");
            }
            let code = body
                .as_ref()
                .and_then(|v| v.get("code"))
                .and_then(|c| c.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
            let data = body.as_ref().and_then(|v| v.get("data")).cloned();
            Error::Api {
                status,
                message,
                code,
                data,
            }
        }
    }
}

/// Parses the `Retry-After` header: delay-seconds or RFC 7231 HTTP-date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get(header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date_time) = httpdate::parse_http_date(header) {
        if let Ok(duration) = date_time.duration_since(SystemTime::now()) {
            return Some(duration);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_validation_with_details() {
        let body = r#"{"message":"name is required","details":{"name":"required"}}"#;
        let err = classify_response(StatusCode::BAD_REQUEST, &HeaderMap::new(), body);
        match err {
            Error::Validation { message, details } => {
                assert_eq!(message, "name is required");
                assert_eq!(details.unwrap()["name"], "required");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn unauthorized_maps_to_the_dedicated_code() {
        let err = classify_response(StatusCode::UNAUTHORIZED, &HeaderMap::new(), "");
        assert_eq!(err.code(), Some(CODE_UNAUTHORIZED));
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn rate_limit_parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(err.is_retryable());
    }

    #[test]
    fn rate_limit_without_header_has_no_delay() {
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "");
        assert_eq!(err.retry_after(), None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_message_preferred_over_status_text() {
        let body = r#"{"message":"database unavailable","code":"DB_DOWN","data":{"shard":3}}"#;
        let err = classify_response(StatusCode::INTERNAL_SERVER_ERROR, &HeaderMap::new(), body);
        match err {
            Error::Api {
                status,
                message,
                code,
                data,
            } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "database unavailable");
                assert_eq!(code, "DB_DOWN");
                assert_eq!(data.unwrap()["shard"], 3);
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn plain_body_falls_back_to_canonical_reason() {
        let err = classify_response(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "upstream died");
        match err {
            Error::Api { message, code, .. } => {
                assert_eq!(message, "Bad Gateway");
                assert_eq!(code, "HTTP_502");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_http_date_is_parsed() {
        let future = SystemTime::now() + Duration::from_secs(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from_str(&httpdate::fmt_http_date(future)).unwrap(),
        );
        let delay = parse_retry_after(&headers).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(25));
    }

    #[test]
    fn port_override_lands_in_the_authority() {
        let base = Url::parse("http://localhost:8080").unwrap();
        let options = RequestOptions::new(Method::GET, "/vehicles")
            .with_port(9200)
            .with_query_param("page", "2");
        let url = options.resolve(&base).unwrap();
        assert_eq!(url.port(), Some(9200));
        assert_eq!(url.path(), "/vehicles");
        assert_eq!(url.query(), Some("page=2"));
    }
}
