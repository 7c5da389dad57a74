//! Per-dependency circuit breaker.
//!
//! Closed -> Open when `failure_threshold` failures land inside the
//! monitoring window. Open rejects calls until `timeout_ms` has passed since
//! the last failure, then the next call moves the breaker to Half-Open.
//! Half-Open admits a bounded number of trial calls; one failure re-opens,
//! `success_threshold` consecutive successes close it again.

use crate::errors::CircuitOpenError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Cooldown after the last failure before a trial call is admitted.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Failures older than this are forgotten.
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,
    /// Concurrent trial calls admitted while half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_monitoring_window_ms() -> u64 {
    60_000
}

fn default_half_open_max_calls() -> u32 {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a config with the given threshold and cooldown.
    #[must_use]
    pub fn new(failure_threshold: u32, timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            timeout_ms,
            ..Self::default()
        }
    }

    /// Sets the success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the monitoring window.
    #[must_use]
    pub fn with_monitoring_window_ms(mut self, window: u64) -> Self {
        self.monitoring_window_ms = window;
        self
    }

    /// Sets the half-open trial call limit.
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A limited number of trial calls pass through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker, for dashboards and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures currently inside the monitoring window.
    pub recent_failures: usize,
    /// Consecutive successes while half-open.
    pub half_open_successes: u32,
    /// Calls admitted.
    pub total_calls: u64,
    /// Admitted calls that failed.
    pub total_failures: u64,
    /// Calls rejected without invoking the operation.
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_time: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure_time: None,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .failures
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            self.failures.pop_front();
        }
    }
}

/// A failure-rate gate guarding one remote dependency.
///
/// Shared process-wide behind an `Arc`; all methods take `&self`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Tracks one admitted call so an abandoned half-open trial frees its slot.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.trial);
        } else {
            self.breaker.on_failure(self.trial);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut inner = self.breaker.inner.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        inner.prune(Instant::now(), self.config.window());
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            recent_failures: inner.failures.len(),
            half_open_successes: inner.half_open_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or `E::from(CircuitOpenError)`
    /// without invoking the operation when the breaker rejects the call.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Like [`CircuitBreaker::execute`], but only errors for which
    /// `is_failure` returns true count against the dependency.
    ///
    /// Other errors are neutral: they neither record a failure nor count as
    /// a half-open success, and a trial slot they held is released.
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::execute`].
    pub async fn execute_classified<T, E, F, Fut, C>(&self, operation: F, is_failure: C) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        C: Fn(&E) -> bool,
    {
        let guard = self.acquire().map_err(E::from)?;
        let result = operation().await;
        match &result {
            Ok(_) => guard.settle(true),
            Err(err) if is_failure(err) => guard.settle(false),
            Err(_) => drop(guard),
        }
        result
    }

    /// Like [`CircuitBreaker::execute`], but returns `fallback` instead of a
    /// circuit-open error. Errors from the operation itself still propagate.
    pub async fn execute_with_fallback<T, E, F, Fut>(&self, operation: F, fallback: T) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Ok(guard) = self.acquire() else {
            return Ok(fallback);
        };
        let result = operation().await;
        guard.settle(result.is_ok());
        result
    }

    /// Returns the breaker to a closed state with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let (calls, failures, rejections) =
            (inner.total_calls, inner.total_failures, inner.total_rejections);
        *inner = BreakerInner::new();
        inner.total_calls = calls;
        inner.total_failures = failures;
        inner.total_rejections = rejections;
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    fn acquire(&self) -> Result<CallGuard<'_>, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let since_failure = inner
                .last_failure_time
                .map_or(Duration::MAX, |t| now.saturating_duration_since(t));

            if since_failure < self.config.timeout() {
                inner.total_rejections += 1;
                let retry_after = self.config.timeout() - since_failure;
                debug!(
                    breaker = %self.name,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "Circuit open, rejecting call"
                );
                return Err(CircuitOpenError::new(self.name.clone(), retry_after));
            }

            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            inner.half_open_in_flight = 0;
            info!(breaker = %self.name, "Circuit half-open, admitting trial calls");
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.total_rejections += 1;
                return Err(CircuitOpenError::new(self.name.clone(), Duration::ZERO));
            }
            inner.half_open_in_flight += 1;
        }

        inner.total_calls += 1;
        Ok(CallGuard {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if !trial {
            return;
        }
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        if inner.state != CircuitState::HalfOpen {
            return;
        }

        inner.half_open_successes += 1;
        if inner.half_open_successes >= self.config.success_threshold {
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.half_open_successes = 0;
            inner.last_failure_time = None;
            info!(breaker = %self.name, "Circuit closed after successful trials");
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.last_failure_time = Some(now);
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.failures.clear();
                inner.half_open_successes = 0;
                warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                inner.prune(now, self.config.window());
                let count = inner.failures.len();
                if count >= self.config.failure_threshold as usize {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = count,
                        cooldown_ms = self.config.timeout_ms,
                        "Failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
