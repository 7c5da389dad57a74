//! Retry utilities with exponential backoff and jitter.
//!
//! Retries happen inside a single executor call and are invisible to the
//! orchestrator unless every attempt fails.

use crate::cancellation::CancellationToken;
use crate::errors::{FitflowError, RemoteError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Classifies an error as transient (worth retrying) or terminal.
pub trait RetryableError {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl RetryableError for RemoteError {
    fn is_retryable(&self) -> bool {
        RemoteError::is_retryable(self)
    }
}

impl RetryableError for FitflowError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl RetryableError for anyhow::Error {
    fn is_retryable(&self) -> bool {
        self.downcast_ref::<RemoteError>()
            .is_some_and(RemoteError::is_retryable)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied to the exponential delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0..=1).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter factor, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    ///
    /// `min(base * multiplier^attempt, max)`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Backoff delay plus `delay * jitter_factor * uniform(0, 1)`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = delay.as_millis() as f64 * self.jitter_factor * rand::thread_rng().gen::<f64>();
        delay + Duration::from_millis(jitter as u64)
    }
}

/// Custom retryability classifier.
pub type RetryClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Observer invoked before each retry with `(retry_number, error, delay)`.
pub type RetryObserver<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// A retry configuration plus its optional hooks.
///
/// Carries no state between calls; one policy can wrap any number of
/// operations concurrently.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    classifier: Option<RetryClassifier<E>>,
    observer: Option<RetryObserver<E>>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            observer: self.observer.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("custom_classifier", &self.classifier.is_some())
            .field("observer", &self.observer.is_some())
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E> RetryPolicy<E> {
    /// Creates a policy using the default error classification.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: None,
            observer: None,
            cancellation: None,
        }
    }

    /// Replaces the default classifier.
    #[must_use]
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Registers a retry observer.
    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &E, Duration) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Makes backoff sleeps interruptible by `token`.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl<E: RetryableError + fmt::Display> RetryPolicy<E> {
    fn should_retry(&self, error: &E) -> bool {
        match self.classifier {
            Some(ref classify) => classify(error),
            None => error.is_retryable(),
        }
    }

    /// Runs `operation`, retrying transient failures.
    ///
    /// The last error is returned unchanged once retries are exhausted, the
    /// error is terminal, or the cancellation token fires during a backoff.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.config.max_retries || !self.should_retry(&error) {
                return Err(error);
            }

            let delay = self.config.jittered_delay(attempt);
            attempt += 1;

            if let Some(ref observer) = self.observer {
                observer(attempt, &error, delay);
            }

            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after error"
            );

            match self.cancellation {
                Some(ref token) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => {
                            debug!(attempt, "Retry backoff interrupted by cancellation");
                            return Err(error);
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Executes an operation with retry logic.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, operation: F) -> Result<T, E>
where
    E: RetryableError + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    policy.run(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CircuitOpenError, NetworkErrorKind};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(max_retries)
            .with_base_delay_ms(1)
            .with_jitter_factor(0.0)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_config_from_partial_json() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[test]
    fn test_backoff_delay_exponential_and_capped() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(1000);

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_jitter_factor(0.5);

        for _ in 0..100 {
            let delay = config.jittered_delay(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_jitter_factor_clamped() {
        assert!((RetryConfig::new().with_jitter_factor(7.0).jitter_factor - 1.0).abs() < f64::EPSILON);
        assert!(RetryConfig::new().with_jitter_factor(-1.0).jitter_factor.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let policy: RetryPolicy<RemoteError> = RetryPolicy::new(fast_config(3));
        let calls = AtomicU32::new(0);

        let result = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RemoteError>(42) }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success_observed_three_times() {
        let seen: Arc<Mutex<Vec<(u32, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = RetryPolicy::new(RetryConfig::new().with_max_retries(3))
            .on_retry(move |attempt, _err: &RemoteError, delay| {
                sink.lock().push((attempt, delay));
            });
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(RemoteError::http(503, "unavailable"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().map(|(a, _)| *a).collect::<Vec<_>>(), vec![1, 2, 3]);

        let config = RetryConfig::new();
        let pre_jitter: Vec<Duration> = (0..3).map(|a| config.backoff_delay(a)).collect();
        assert!(pre_jitter.windows(2).all(|w| w[0] < w[1]));
        assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let policy = RetryPolicy::new(fast_config(2));
        let calls = AtomicU32::new(0);

        let result: Result<(), RemoteError> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(RemoteError::Timeout { elapsed_ms: u64::from(n) }) }
            })
            .await;

        assert_eq!(result, Err(RemoteError::Timeout { elapsed_ms: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_not_retried() {
        let policy = RetryPolicy::new(fast_config(5));

        for error in [
            RemoteError::http(400, "bad request"),
            RemoteError::CircuitOpen(CircuitOpenError::new("segmentation", Duration::from_secs(3))),
        ] {
            let calls = AtomicU32::new(0);
            let expected = error.clone();
            let result: Result<(), RemoteError> = policy
                .run(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let e = error.clone();
                    async move { Err(e) }
                })
                .await;

            assert_eq!(result, Err(expected));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let policy = RetryPolicy::new(fast_config(2)).with_classifier(|e: &RemoteError| {
            matches!(e, RemoteError::Other(msg) if msg == "flaky")
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), RemoteError> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Other("flaky".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let token = Arc::new(CancellationToken::new());
        let policy = RetryPolicy::new(RetryConfig::new().with_base_delay_ms(60_000))
            .with_cancellation(token.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = tokio::spawn(async move {
            policy
                .run(|| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(RemoteError::network(
                            NetworkErrorKind::ConnectionReset,
                            "reset",
                        ))
                    }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("user cancelled");

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RemoteError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_anyhow_classification_downcasts() {
        let transient = anyhow::Error::new(RemoteError::http(502, "bad gateway"));
        let terminal = anyhow::anyhow!("boom");
        assert!(RetryableError::is_retryable(&transient));
        assert!(!RetryableError::is_retryable(&terminal));
    }
}
