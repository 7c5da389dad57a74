//! Resilience primitives wrapped around every remote model call.
//!
//! - [`RetryPolicy`]: bounded exponential backoff with jitter
//! - [`CircuitBreaker`]: per-dependency failure-rate gate
//! - [`CircuitBreakerRegistry`]: shared breakers keyed by dependency

mod circuit_breaker;
mod registry;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use registry::{CircuitBreakerRegistry, FITTING_SYNTHESIS, SEGMENTATION, VIDEO_SYNTHESIS};
pub use retry::{
    with_retry, RetryClassifier, RetryConfig, RetryObserver, RetryPolicy, RetryableError,
};
