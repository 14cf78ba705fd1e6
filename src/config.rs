//! Startup configuration for the client, loadable from the environment.

use crate::breaker::BreakerConfig;
use crate::{Error, Result};
use std::time::Duration;
use url::Url;

/// Configuration consumed once at client startup.
///
/// All fields have working defaults; [`ClientConfig::from_env`] overrides
/// them from `BREAKWATER_*` environment variables. Malformed values are
/// reported as [`Error::Configuration`] rather than silently defaulted.
///
/// # Examples
///
/// ```
/// use breakwater::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(config.api_port, 8080);
/// assert_eq!(config.base_url().unwrap().as_str(), "http://localhost:8080/");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend host, with or without a scheme (`http://` is assumed).
    pub api_host: String,
    /// Default backend port; individual calls may override it.
    pub api_port: u16,
    /// Per-attempt timeout enforced by the pipeline's governor.
    pub request_timeout: Duration,
    /// Circuit breaker thresholds and timings.
    pub breaker: BreakerConfig,
    /// Health endpoint path (e.g. `/health`); `None` disables the
    /// health-check loop.
    pub health_check_path: Option<String>,
    /// Base unit for exponential retry backoff.
    pub retry_base_delay: Duration,
    /// Hard cap on retry attempts per logical call.
    pub max_retries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: "localhost".to_string(),
            api_port: 8080,
            request_timeout: Duration::from_secs(10),
            breaker: BreakerConfig::default(),
            health_check_path: None,
            retry_base_delay: Duration::from_millis(300),
            max_retries: 3,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `BREAKWATER_*` environment variables.
    ///
    /// Recognized variables: `BREAKWATER_API_HOST`, `BREAKWATER_API_PORT`,
    /// `BREAKWATER_REQUEST_TIMEOUT_MS`, `BREAKWATER_FAILURE_THRESHOLD`,
    /// `BREAKWATER_RESET_TIMEOUT_MS`, `BREAKWATER_HALF_OPEN_MAX_PROBES`,
    /// `BREAKWATER_HEALTH_CHECK_INTERVAL_MS`, `BREAKWATER_HEALTH_CHECK_PATH`,
    /// `BREAKWATER_RETRY_BASE_DELAY_MS`, `BREAKWATER_MAX_RETRIES`. Unset
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a set variable fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("BREAKWATER_API_HOST") {
            config.api_host = host;
        }
        if let Some(port) = lookup("BREAKWATER_API_PORT") {
            config.api_port = parse(&port, "BREAKWATER_API_PORT")?;
        }
        if let Some(ms) = lookup("BREAKWATER_REQUEST_TIMEOUT_MS") {
            config.request_timeout =
                Duration::from_millis(parse(&ms, "BREAKWATER_REQUEST_TIMEOUT_MS")?);
        }
        if let Some(n) = lookup("BREAKWATER_FAILURE_THRESHOLD") {
            config.breaker.failure_threshold = parse(&n, "BREAKWATER_FAILURE_THRESHOLD")?;
        }
        if let Some(ms) = lookup("BREAKWATER_RESET_TIMEOUT_MS") {
            config.breaker.reset_timeout =
                Duration::from_millis(parse(&ms, "BREAKWATER_RESET_TIMEOUT_MS")?);
        }
        if let Some(n) = lookup("BREAKWATER_HALF_OPEN_MAX_PROBES") {
            config.breaker.half_open_max_probes = parse(&n, "BREAKWATER_HALF_OPEN_MAX_PROBES")?;
        }
        if let Some(ms) = lookup("BREAKWATER_HEALTH_CHECK_INTERVAL_MS") {
            config.breaker.health_check_interval =
                Duration::from_millis(parse(&ms, "BREAKWATER_HEALTH_CHECK_INTERVAL_MS")?);
        }
        if let Some(path) = lookup("BREAKWATER_HEALTH_CHECK_PATH") {
            config.health_check_path = Some(path);
        }
        if let Some(ms) = lookup("BREAKWATER_RETRY_BASE_DELAY_MS") {
            config.retry_base_delay =
                Duration::from_millis(parse(&ms, "BREAKWATER_RETRY_BASE_DELAY_MS")?);
        }
        if let Some(n) = lookup("BREAKWATER_MAX_RETRIES") {
            config.max_retries = parse(&n, "BREAKWATER_MAX_RETRIES")?;
        }

        config.breaker.validate()?;
        Ok(config)
    }

    /// Composes the default base URL from host and port.
    ///
    /// A host without a scheme gets `http://`.
    pub fn base_url(&self) -> Result<Url> {
        let host = if self.api_host.contains("://") {
            self.api_host.clone()
        } else {
            format!("http://{}", self.api_host)
        };
        let mut url = Url::parse(&host)?;
        url.set_port(Some(self.api_port))
            .map_err(|_| Error::Configuration(format!("cannot set port on URL {host}")))?;
        Ok(url)
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid value {value:?} for {name}")))
}
