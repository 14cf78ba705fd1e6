//! Circuit breaker gating outbound calls on recent failure history.
//!
//! The breaker is a passive state machine: it answers questions
//! ([`CircuitBreaker::evaluate`], [`CircuitBreaker::is_open`]) and updates
//! counters ([`CircuitBreaker::record_success`],
//! [`CircuitBreaker::record_failure`]); it never performs rejection itself.
//! All rejection and error propagation is the request pipeline's job.
//!
//! # State transitions
//!
//! ```text
//! Closed ──[failure_threshold failures]──> Open
//!   ▲                                        │
//!   │         [reset_timeout elapses, next evaluate()]
//!   │         [or health check returns 200]
//!   │                                        ▼
//!   └──[half_open_max_probes successes]── HalfOpen
//!          [any failure] ──────────────────> Open
//!
//! ForcedOpen: entered only via force_open(), exited only via force_close().
//! ```
//!
//! The `Open → HalfOpen` transition is lazy: it happens inside
//! [`CircuitBreaker::evaluate`], called once per pipeline attempt, not from a
//! background timer. The optional health-check loop offers a second,
//! opportunistic way out of `Open`; both paths are legal and race benignly.
//!
//! One breaker instance is shared by every call going through the facade; it
//! is created once when the client is built and lives for the process
//! lifetime. Call [`CircuitBreaker::destroy`] on shutdown (or test teardown)
//! so the health-check task does not outlive it.

use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use url::Url;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Too many failures; calls are rejected before any network I/O.
    Open,
    /// Testing recovery: calls pass, consecutive successes close the circuit.
    ///
    /// Concurrency while half-open is deliberately unbounded: recovery
    /// requires `half_open_max_probes` consecutive successes, not serialized
    /// probes. Any number of calls may be in flight at once in this state.
    HalfOpen,
    /// Manually tripped via [`CircuitBreaker::force_open`]; only
    /// [`CircuitBreaker::force_close`] exits this state.
    ForcedOpen,
}

/// Configuration for the circuit breaker.
///
/// # Examples
///
/// ```
/// use breakwater::BreakerConfig;
/// use std::time::Duration;
///
/// let config = BreakerConfig {
///     failure_threshold: 3,
///     reset_timeout: Duration::from_secs(10),
///     ..BreakerConfig::default()
/// };
/// assert_eq!(config.half_open_max_probes, 2);
/// ```
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures (while `Closed`) that open the circuit.
    ///
    /// Must be at least 1. The transition happens the instant the counter
    /// reaches this value. Default: 5.
    pub failure_threshold: u32,

    /// How long the circuit stays `Open` before the next [`CircuitBreaker::evaluate`]
    /// flips it to `HalfOpen`. Default: 30 seconds.
    pub reset_timeout: Duration,

    /// Consecutive successes required in `HalfOpen` to close the circuit.
    ///
    /// Must be at least 1. Default: 2.
    pub half_open_max_probes: u32,

    /// Polling interval for the optional health-check loop. Only used when a
    /// health-check path is wired up through the client builder. Default: 10
    /// seconds.
    pub health_check_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 2,
            health_check_interval: Duration::from_secs(10),
        }
    }
}

impl BreakerConfig {
    /// Validates threshold fields.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if `failure_threshold` or
    /// `half_open_max_probes` is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.failure_threshold == 0 {
            return Err(crate::Error::Configuration(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_probes == 0 {
            return Err(crate::Error::Configuration(
                "half_open_max_probes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time snapshot of breaker request accounting.
///
/// `success_rate_percent` is recomputed from the two counters on every
/// snapshot; it is never incrementally drifted. Counters reset only on
/// [`CircuitBreaker::reset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerMetrics {
    /// Total requests recorded (successes plus failures).
    pub total_requests: u64,
    /// Requests recorded as failures.
    pub failed_requests: u64,
    /// Derived success rate; 100.0 when no requests have been recorded.
    pub success_rate_percent: f64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    total_requests: u64,
    failed_requests: u64,
}

impl BreakerInner {
    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.half_open_successes = 0;
        self.last_failure = None;
        self.total_requests = 0;
        self.failed_requests = 0;
    }
}

/// Shared-state circuit breaker for a single logical backend.
///
/// Thread-safe: interior state sits behind a `Mutex` because trips and probe
/// accounting are compound updates, and no `.await` ever runs under the lock.
/// Share it across tasks with `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl CircuitBreaker {
    /// Creates a breaker in the `Closed` state with zeroed counters.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                half_open_successes: 0,
                last_failure: None,
                total_requests: 0,
                failed_requests: 0,
            }),
            config,
            health_task: Mutex::new(None),
        }
    }

    /// Performs the read-triggered state transition and returns the result.
    ///
    /// While `Open`, if `reset_timeout` has elapsed since the last failure,
    /// the breaker flips to `HalfOpen` before returning. The pipeline calls
    /// this exactly once per attempt; no background task mutates the state
    /// machine on this path.
    pub fn evaluate(&self) -> CircuitState {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map_or(true, |t| t.elapsed() >= self.config.reset_timeout);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                tracing::info!("Circuit breaker half-open, testing recovery");
            }
        }
        inner.state
    }

    /// Returns `true` if calls must be rejected right now.
    ///
    /// Runs [`CircuitBreaker::evaluate`] first, so a breaker whose reset
    /// timeout has elapsed answers `false` and is already `HalfOpen`.
    pub fn is_open(&self) -> bool {
        matches!(
            self.evaluate(),
            CircuitState::Open | CircuitState::ForcedOpen
        )
    }

    /// Returns the current state without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Records a successful call.
    ///
    /// In `HalfOpen`, bumps the probe counter; reaching
    /// `half_open_max_probes` consecutive successes resets the breaker to
    /// `Closed`.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.half_open_max_probes {
                inner.reset();
                tracing::info!("Circuit breaker closed, normal operation resumed");
            }
        }
    }

    /// Records a failed call.
    ///
    /// In `Closed`, increments the consecutive-failure counter and opens the
    /// circuit the instant it reaches `failure_threshold`. In `HalfOpen`, any
    /// failure immediately reopens the circuit with a fresh failure
    /// timestamp.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        inner.failed_requests += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                    tracing::warn!(
                        failures = inner.failures,
                        "Circuit breaker opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                tracing::warn!("Circuit breaker reopened by half-open failure");
            }
            CircuitState::Open | CircuitState::ForcedOpen => {}
        }
    }

    /// Manual kill switch: forces the circuit open until
    /// [`CircuitBreaker::force_close`] is called.
    ///
    /// Not used by the failure-counting logic itself; `ForcedOpen` ignores
    /// both the reset timeout and the health-check loop.
    pub fn force_open(&self) {
        self.lock().state = CircuitState::ForcedOpen;
        tracing::warn!("Circuit breaker forced open");
    }

    /// Exits `ForcedOpen` by resetting the breaker.
    pub fn force_close(&self) {
        self.reset();
    }

    /// Resets the breaker to `Closed` with all counters zeroed.
    ///
    /// Idempotent: calling it twice in a row leaves the same state with no
    /// further side effects.
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Snapshots the request accounting counters.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        let success_rate_percent = if inner.total_requests == 0 {
            100.0
        } else {
            let succeeded = inner.total_requests - inner.failed_requests;
            succeeded as f64 / inner.total_requests as f64 * 100.0
        };
        BreakerMetrics {
            total_requests: inner.total_requests,
            failed_requests: inner.failed_requests,
            success_rate_percent,
        }
    }

    /// Health-check hook: transitions `Open → HalfOpen`.
    ///
    /// No-op in every other state; in particular it cannot exit `ForcedOpen`.
    pub fn note_health_ok(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            tracing::info!("Circuit breaker half-open after successful health check");
        }
    }

    /// Starts the background health-check loop.
    ///
    /// On each `health_check_interval` tick, while the circuit is `Open`,
    /// issues a lightweight `GET` to `health_url`; an HTTP 200 flips the
    /// breaker to `HalfOpen` via [`CircuitBreaker::note_health_ok`]. Any
    /// other status or a transport failure leaves it `Open`.
    ///
    /// The task holds only a `Weak` reference and stops on its own once the
    /// breaker is dropped; [`CircuitBreaker::destroy`] stops it eagerly.
    pub(crate) fn spawn_health_check(
        self: &std::sync::Arc<Self>,
        http: reqwest::Client,
        health_url: Url,
    ) {
        let weak: Weak<CircuitBreaker> = std::sync::Arc::downgrade(self);
        let interval = self.config.health_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the loop polls on
            // the configured cadence.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(breaker) = weak.upgrade() else {
                    break;
                };
                if breaker.state() != CircuitState::Open {
                    continue;
                }
                match http.get(health_url.clone()).send().await {
                    Ok(response) if response.status() == http::StatusCode::OK => {
                        tracing::debug!(url = %health_url, "Health check succeeded");
                        breaker.note_health_ok();
                    }
                    Ok(response) => {
                        tracing::debug!(
                            url = %health_url,
                            status = response.status().as_u16(),
                            "Health check returned non-200"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(url = %health_url, error = %e, "Health check failed");
                    }
                }
            }
        });
        *self.health_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stops the health-check task, if one was started.
    ///
    /// Idempotent; the task is aborted exactly once. Call this on process
    /// shutdown or test teardown.
    pub fn destroy(&self) {
        if let Some(handle) = self
            .health_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // State updates cannot leave the inner struct inconsistent, so a
        // poisoned lock is still safe to reuse.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(100),
            half_open_max_probes: 2,
            health_check_interval: Duration::from_secs(10),
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!breaker.is_open());
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(fast_config(3));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let breaker = CircuitBreaker::new(fast_config(3));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn evaluate_flips_to_half_open_after_reset_timeout() {
        let breaker = CircuitBreaker::new(fast_config(1));
        breaker.record_failure();
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(150));

        // The transition is a side effect of evaluation, not of a timer.
        assert_eq!(breaker.evaluate(), CircuitState::HalfOpen);
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_probes_close_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(breaker.evaluate(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // reset() zeroed the failure counter along with the metrics.
        assert_eq!(breaker.metrics().total_requests, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(breaker.evaluate(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        // The reopen stamped a fresh failure time, so the circuit holds.
        assert!(breaker.is_open());
    }

    #[test]
    fn forced_open_ignores_reset_timeout() {
        let breaker = CircuitBreaker::new(fast_config(1));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::ForcedOpen);

        std::thread::sleep(Duration::from_millis(150));
        assert!(breaker.is_open());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::ForcedOpen);

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_is_idempotent() {
        let breaker = CircuitBreaker::new(fast_config(1));
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_requests, 0);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_requests, 0);
    }

    #[test]
    fn metrics_are_recomputed_from_counters() {
        let breaker = CircuitBreaker::new(fast_config(10));
        assert_eq!(breaker.metrics().success_rate_percent, 100.0);

        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.success_rate_percent, 75.0);
    }

    #[test]
    fn config_validation_rejects_zero_thresholds() {
        let config = BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = BreakerConfig {
            half_open_max_probes: 0,
            ..BreakerConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(BreakerConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(BreakerConfig::default()));
        let url = Url::parse("http://127.0.0.1:9/health").unwrap();
        breaker.spawn_health_check(reqwest::Client::new(), url);

        breaker.destroy();
        breaker.destroy();
    }
}
