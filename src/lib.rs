//! # Breakwater - a resilient HTTP API client
//!
//! Breakwater wraps every outbound call to a backend in a request pipeline
//! built on `reqwest`: a circuit-breaker state machine, exponential-backoff
//! retries with jitter, request timeouts via cancellation, and a typed error
//! taxonomy downstream code can branch on. Callers get correct behavior under
//! partial failure (slow backend, transient network errors, server overload)
//! without reasoning about retries or backend health themselves.
//!
//! ## Quick Start
//!
//! ```no_run
//! use breakwater::{BreakerConfig, Client, RetryPolicy};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateOrder {
//!     customer_id: u64,
//! }
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     id: u64,
//!     status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), breakwater::Error> {
//!     let client = Client::builder()
//!         .base_url("http://localhost:8080")?
//!         .timeout(Duration::from_secs(10))
//!         .breaker_config(BreakerConfig {
//!             failure_threshold: 5,
//!             reset_timeout: Duration::from_secs(30),
//!             ..BreakerConfig::default()
//!         })
//!         .retry_policy(RetryPolicy::new(Duration::from_millis(300), 3))
//!         .health_check_path("/health")
//!         .build()?;
//!
//!     let order: Order = client.get("/orders/42").await?;
//!     println!("order {} is {}", order.id, order.status);
//!
//!     let created: Order = client
//!         .post("/orders", &CreateOrder { customer_id: 7 })
//!         .await?;
//!     println!("created order {}", created.id);
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Circuit breaker** - one shared breaker per backend trips after
//!   consecutive failures, rejects calls before any network I/O while open,
//!   and probes recovery through a half-open state (optionally assisted by a
//!   background health check)
//! - **Retries with jitter** - exponential backoff for network errors,
//!   timeouts, and 5xx responses; `Retry-After` honored verbatim on 429
//! - **Typed error taxonomy** - network, timeout, validation, rate-limit, and
//!   generic API errors carrying status, machine-readable code, and
//!   structured data
//! - **Timeout governor** - per-attempt cancellation of slow requests
//! - **Auth injection** - bearer tokens read from a pluggable store; an
//!   injectable hook fires on 401 (session expiry) so the core stays testable
//! - **Structured logging** - `tracing` events for requests, responses,
//!   retries, and breaker transitions
//!
//! ## Error Handling
//!
//! All terminal failures are surfaced typed, never swallowed:
//!
//! ```no_run
//! use breakwater::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("http://localhost:8080")?.build()?;
//! match client.get::<serde_json::Value>("/customers").await {
//!     Ok(customers) => println!("{customers:?}"),
//!     Err(Error::Api { code, .. }) if code == breakwater::CODE_CIRCUIT_OPEN => {
//!         eprintln!("backend is unhealthy, try again shortly");
//!     }
//!     Err(Error::RateLimit { retry_after }) => {
//!         eprintln!("rate limited, retry after {retry_after:?}");
//!     }
//!     Err(e) => eprintln!("request failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod breaker;
mod client;
mod config;
mod error;
mod pipeline;
mod retry;

pub use auth::{MemoryTokenStore, TokenStore, UnauthorizedHook};
pub use breaker::{BreakerConfig, BreakerMetrics, CircuitBreaker, CircuitState};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::{Error, Result, CODE_CIRCUIT_OPEN, CODE_UNAUTHORIZED};
pub use pipeline::RequestOptions;
pub use retry::RetryPolicy;
