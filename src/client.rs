//! Typed client facade over the request pipeline.
//!
//! The [`Client`] exposes thin verb methods (get/post/put/delete/patch) that
//! resolve the effective target URL and delegate to the pipeline. It
//! duplicates no retry or circuit logic. Use [`ClientBuilder`] to configure
//! and create clients.

use crate::{
    auth::{TokenStore, UnauthorizedHook},
    breaker::{BreakerConfig, CircuitBreaker},
    config::ClientConfig,
    pipeline::{Pipeline, RequestOptions},
    retry::RetryPolicy,
    Error, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A resilient HTTP client for a single logical backend.
///
/// Every call passes through one shared circuit breaker and one retry policy;
/// callers never reason about retries or backend health themselves. The
/// client is cheap to clone and designed to be built once at startup.
///
/// # Examples
///
/// ```no_run
/// use breakwater::{BreakerConfig, Client, RetryPolicy};
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct Driver {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), breakwater::Error> {
/// let client = Client::builder()
///     .base_url("http://localhost:8080")?
///     .timeout(Duration::from_secs(10))
///     .breaker_config(BreakerConfig {
///         failure_threshold: 3,
///         ..BreakerConfig::default()
///     })
///     .retry_policy(RetryPolicy::new(Duration::from_millis(300), 3))
///     .build()?;
///
/// let driver: Driver = client.get("/drivers/7").await?;
/// println!("driver {} is {}", driver.id, driver.name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pipeline: Pipeline,
    base_url: Url,
}

impl Client {
    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client from startup configuration (typically
    /// [`ClientConfig::from_env`]).
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .base_url(config.base_url()?.as_str())?
            .timeout(config.request_timeout)
            .breaker_config(config.breaker.clone())
            .retry_policy(RetryPolicy::new(config.retry_base_delay, config.max_retries));
        if let Some(path) = &config.health_check_path {
            builder = builder.health_check_path(path);
        }
        builder.build()
    }

    /// Makes a request with explicit [`RequestOptions`].
    ///
    /// This is the escape hatch for per-call port overrides, extra headers,
    /// query parameters, and timeout overrides; the verb methods delegate
    /// here.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use breakwater::{Client, RequestOptions};
    /// use http::Method;
    ///
    /// # async fn example() -> Result<(), breakwater::Error> {
    /// # let client = Client::builder().base_url("http://localhost:8080")?.build()?;
    /// // Hit the reporting service on its own port.
    /// let options = RequestOptions::new(Method::GET, "/reports/daily").with_port(9200);
    /// let report: serde_json::Value = client.call::<(), _>(options, None).await?;
    /// # let _ = report;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(&self, options: RequestOptions, body: Option<&Req>) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let url = options.resolve(&self.inner.base_url)?;
        self.inner
            .pipeline
            .dispatch(
                url,
                options.method.clone(),
                &options.headers,
                body,
                options.timeout,
            )
            .await
    }

    /// Makes a GET request and returns the decoded body.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        self.call::<(), Res>(RequestOptions::new(Method::GET, path), None)
            .await
    }

    /// Makes a POST request with a JSON body and returns the decoded body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.call(RequestOptions::new(Method::POST, path), Some(body))
            .await
    }

    /// Makes a PUT request with a JSON body and returns the decoded body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.call(RequestOptions::new(Method::PUT, path), Some(body))
            .await
    }

    /// Makes a DELETE request and returns the decoded body.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        self.call::<(), Res>(RequestOptions::new(Method::DELETE, path), None)
            .await
    }

    /// Makes a PATCH request with a JSON body and returns the decoded body.
    pub async fn patch<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.call(RequestOptions::new(Method::PATCH, path), Some(body))
            .await
    }

    /// Returns the shared circuit breaker, for metrics and the manual kill
    /// switch ([`CircuitBreaker::force_open`] / [`CircuitBreaker::force_close`]).
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(self.inner.pipeline.breaker())
    }

    /// Tears down background resources (the breaker's health-check task).
    ///
    /// Call on process shutdown or test teardown. Idempotent.
    pub fn shutdown(&self) {
        self.inner.pipeline.breaker().destroy();
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// This is the single instantiation point for the client's circuit breaker:
/// `build()` creates exactly one breaker shared by all calls made through the
/// resulting client (and its clones) for the process lifetime.
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Duration,
    retry_policy: RetryPolicy,
    breaker_config: BreakerConfig,
    health_check_path: Option<String>,
    token_store: Option<Arc<dyn TokenStore>>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ClientBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            breaker_config: BreakerConfig::default(),
            health_check_path: None,
            token_store: None,
            on_unauthorized: None,
        }
    }

    /// Sets the base URL all request paths resolve against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header included in every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-attempt request timeout. Default: 10 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the circuit-breaker configuration.
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Enables the breaker's health-check loop against the given path.
    ///
    /// While the circuit is open, a background task polls
    /// `GET <base_url><path>` on the breaker's configured interval; an HTTP
    /// 200 moves the breaker to half-open. Requires a running tokio runtime
    /// at `build()` time.
    pub fn health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }

    /// Sets the credential store read before each request.
    ///
    /// When present and holding a token, requests carry
    /// `Authorization: Bearer <token>`.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Sets the hook invoked when the backend answers 401.
    pub fn on_unauthorized(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    /// Builds the configured [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, the breaker thresholds
    /// are invalid, or the HTTP client cannot be constructed.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;

        self.breaker_config.validate()?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let breaker = Arc::new(CircuitBreaker::new(self.breaker_config));

        if let Some(path) = &self.health_check_path {
            let mut health_url = base_url.clone();
            health_url.set_path(path);
            breaker.spawn_health_check(http.clone(), health_url);
        }

        let pipeline = Pipeline::new(
            http,
            breaker,
            self.retry_policy,
            self.default_headers,
            self.token_store,
            self.on_unauthorized,
            self.timeout,
        );

        Ok(Client {
            inner: Arc::new(ClientInner { pipeline, base_url }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
