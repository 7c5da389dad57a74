//! Process-wide registry of circuit breakers, one per remote dependency.
//!
//! The registry is created once by the host and injected into executor
//! construction, so tests can use isolated instances.

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use dashmap::DashMap;
use std::sync::Arc;

/// Dependency name of the garment segmentation model.
pub const SEGMENTATION: &str = "segmentation";
/// Dependency name of the garment fitting (try-on) synthesis model.
pub const FITTING_SYNTHESIS: &str = "fitting-synthesis";
/// Dependency name of the video synthesis model.
pub const VIDEO_SYNTHESIS: &str = "video-synthesis";

/// Registry mapping dependency names to shared breakers.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry; unknown dependencies get `default_config`.
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Creates a registry with the three pipeline dependencies registered.
    ///
    /// Video synthesis trips sooner and cools down longer since each call
    /// costs far more than an image call.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::default();
        registry.register(SEGMENTATION, CircuitBreakerConfig::new(5, 30_000));
        registry.register(FITTING_SYNTHESIS, CircuitBreakerConfig::new(5, 30_000));
        registry.register(
            VIDEO_SYNTHESIS,
            CircuitBreakerConfig::new(3, 60_000).with_monitoring_window_ms(120_000),
        );
        registry
    }

    /// Registers (or replaces) a breaker.
    pub fn register(&self, name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
        self.breakers.insert(name, breaker.clone());
        breaker
    }

    /// Returns a registered breaker.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Returns the breaker for `name`, creating it with the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .value()
            .clone()
    }

    /// Returns the number of registered breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots every breaker, sorted by name.
    #[must_use]
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|entry| entry.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Resets every breaker to closed.
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[test]
    fn test_defaults_registered() {
        let registry = CircuitBreakerRegistry::with_defaults();
        assert_eq!(registry.len(), 3);

        let video = registry.get(VIDEO_SYNTHESIS).unwrap();
        let seg = registry.get(SEGMENTATION).unwrap();
        assert!(video.config().failure_threshold < seg.config().failure_threshold);
        assert!(video.config().timeout_ms > seg.config().timeout_ms);
    }

    #[test]
    fn test_get_or_create_is_shared() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("upscaler");
        let b = registry.get_or_create("upscaler");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stats_sorted() {
        let registry = CircuitBreakerRegistry::with_defaults();
        let names: Vec<_> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![FITTING_SYNTHESIS, SEGMENTATION, VIDEO_SYNTHESIS]);
        assert!(registry
            .stats()
            .iter()
            .all(|s| s.state == CircuitState::Closed));
    }

    #[test]
    fn test_isolated_registries() {
        let first = CircuitBreakerRegistry::with_defaults();
        let second = CircuitBreakerRegistry::with_defaults();
        assert!(!Arc::ptr_eq(
            &first.get(SEGMENTATION).unwrap(),
            &second.get(SEGMENTATION).unwrap()
        ));
    }
}
