//! Typed error taxonomy for outbound API calls.
//!
//! Every failure that escapes the request pipeline is one of these variants,
//! carrying enough information for downstream code to branch on: HTTP status,
//! a machine-readable code, and optional structured data from the server.

use http::StatusCode;
use std::time::Duration;

/// Machine-readable code attached to circuit-breaker rejections.
pub const CODE_CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";

/// Machine-readable code attached to 401 responses.
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";

/// The error type for API calls made through [`crate::Client`].
///
/// The first five variants form the classification taxonomy the retry policy
/// and circuit breaker reason about; the rest cover configuration and
/// (de)serialization problems that never reach either.
///
/// # Examples
///
/// ```no_run
/// use breakwater::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.get::<serde_json::Value>("/orders/42").await {
///     Ok(order) => println!("{order:?}"),
///     Err(Error::Validation { message, details }) => {
///         eprintln!("rejected by server: {message} ({details:?})");
///     }
///     Err(Error::Api { status, code, .. }) => {
///         eprintln!("API error {status} ({code})");
///     }
///     Err(e) => eprintln!("call failed: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection refused, DNS failure, etc.).
    ///
    /// No usable HTTP response was received. Always eligible for retry and
    /// always counted against the circuit breaker.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request was aborted by the client-side timeout governor.
    ///
    /// HTTP-equivalent of a 408: the backend may be up but too slow.
    #[error("Request timed out after {elapsed:?}")]
    Timeout {
        /// The configured timeout that elapsed.
        elapsed: Duration,
    },

    /// The server rejected the request as malformed (HTTP 400).
    ///
    /// Carries server-provided field-level details when the response body
    /// included them. Never retried and never trips the breaker: the request
    /// itself is at fault, not the backend.
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable message from the server (or the status reason).
        message: String,
        /// Structured field-level details, if the server supplied any.
        details: Option<serde_json::Value>,
    },

    /// The server is rate limiting us (HTTP 429).
    ///
    /// `retry_after` is parsed from the `Retry-After` response header when
    /// present; the retry policy honors it verbatim instead of the
    /// exponential formula. Without it the call is not retried.
    #[error("Rate limited")]
    RateLimit {
        /// How long the server asked us to wait, if it said.
        retry_after: Option<Duration>,
    },

    /// Any other non-2xx response, plus the synthetic `CIRCUIT_OPEN` and
    /// `UNAUTHORIZED` kinds.
    ///
    /// `message` prefers a server-supplied message field over the canonical
    /// status reason; `code` prefers a server-supplied code over
    /// `HTTP_<status>`.
    #[error("API error {status} ({code}): {message}")]
    Api {
        /// The HTTP status code (real or synthetic).
        status: StatusCode,
        /// Human-readable message.
        message: String,
        /// Machine-readable code for branching.
        code: String,
        /// Structured payload from the server, if any.
        data: Option<serde_json::Value>,
    },

    /// Invalid client or request configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be serialized to JSON.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// A 2xx response body could not be decoded into the expected type.
    ///
    /// The raw body and serde message are preserved for debugging. The
    /// transport succeeded, so this neither retries nor trips the breaker.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    Deserialization {
        /// The raw response body that failed to decode.
        raw_response: String,
        /// The serde error message.
        serde_error: String,
        /// The HTTP status of the response.
        status: StatusCode,
    },
}

impl Error {
    /// Builds the rejection returned when the circuit breaker is open.
    ///
    /// Status 503, code [`CODE_CIRCUIT_OPEN`]. Raised by the pipeline before
    /// any network I/O is attempted.
    pub fn circuit_open() -> Self {
        Error::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "Service temporarily unavailable".to_string(),
            code: CODE_CIRCUIT_OPEN.to_string(),
            data: None,
        }
    }

    /// Builds the error for a 401 response.
    ///
    /// Status 401, code [`CODE_UNAUTHORIZED`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Api {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
            code: CODE_UNAUTHORIZED.to_string(),
            data: None,
        }
    }

    /// Returns `true` if this error is eligible for retry.
    ///
    /// Network errors, timeouts, 5xx responses, and rate limits that named a
    /// `Retry-After` are retryable. Validation errors, other 4xx responses,
    /// and local configuration/serialization problems are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use breakwater::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::Api {
    ///     status: StatusCode::INTERNAL_SERVER_ERROR,
    ///     message: "boom".to_string(),
    ///     code: "HTTP_500".to_string(),
    ///     data: None,
    /// };
    /// assert!(err.is_retryable());
    ///
    /// let err = Error::Validation { message: "bad field".to_string(), details: None };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout { .. } => true,
            Error::Api { status, .. } => status.is_server_error(),
            Error::RateLimit { retry_after } => retry_after.is_some(),
            _ => false,
        }
    }

    /// Returns `true` if this failure should count toward circuit-breaker
    /// failure accounting.
    ///
    /// Only evidence of backend unhealth counts: network errors, governor
    /// timeouts, and 5xx responses. 4xx responses indicate a problem with the
    /// request, not the backend, and must not trip the breaker. The synthetic
    /// `CIRCUIT_OPEN` rejection is a 503 but is raised before any transport
    /// call, so the pipeline never feeds it back in.
    pub fn counts_against_breaker(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout { .. } => true,
            Error::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Returns the HTTP status code associated with this error, if any.
    ///
    /// Timeouts report 408 (their HTTP equivalent), validation errors 400,
    /// rate limits 429.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Timeout { .. } => Some(StatusCode::REQUEST_TIMEOUT),
            Error::Validation { .. } => Some(StatusCode::BAD_REQUEST),
            Error::RateLimit { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Error::Api { status, .. } => Some(*status),
            Error::Deserialization { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the machine-readable code carried by [`Error::Api`] variants.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns the server-requested retry delay for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A specialized `Result` type for API calls.
pub type Result<T> = std::result::Result<T, Error>;
