//! Step executors.
//!
//! - [`MockStepExecutor`]: deterministic fake results for `use_mock`
//! - [`RemoteModel`]: the boundary to hosted model adapters
//! - [`ModelStepExecutor`]: calls models through breaker and retry, with
//!   optional A/B fan-out

mod mock;
mod model;
mod remote;

pub use mock::{mock_registry, MockStepExecutor, MOCK_MODEL};
pub use model::{ModelBinding, ModelStepExecutor};
pub use remote::{output_urls, ModelRequest, ModelResponse, RemoteModel};

use crate::pipeline::{
    ExecutorRegistry, SEGMENTATION_STEP, VIDEO_GENERATION_STEP, VIRTUAL_TRYON_STEP,
};
use crate::resilience::{
    CircuitBreakerRegistry, RetryConfig, FITTING_SYNTHESIS, SEGMENTATION, VIDEO_SYNTHESIS,
};
use std::sync::Arc;

/// The models backing the standard steps.
#[derive(Debug, Clone)]
pub struct ModelSet {
    /// Garment segmentation model.
    pub segmentation: Arc<dyn RemoteModel>,
    /// Try-on models in variant order; the first is used without A/B comparison.
    pub virtual_tryon: Vec<(String, Arc<dyn RemoteModel>)>,
    /// Image-to-video model.
    pub video: Arc<dyn RemoteModel>,
}

/// Builds executors for the standard steps.
///
/// Each step's calls go through the breaker registered under its dependency
/// name in `breakers`, so health is shared with every other run using the
/// same registry. Steps without models are left unregistered.
#[must_use]
pub fn model_registry(
    models: &ModelSet,
    breakers: &CircuitBreakerRegistry,
    retry: &RetryConfig,
) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();

    registry.register(
        SEGMENTATION_STEP,
        Arc::new(
            ModelStepExecutor::new(ModelBinding::new(
                "A",
                Arc::clone(&models.segmentation),
                breakers.get_or_create(SEGMENTATION),
            ))
            .with_retry_config(retry.clone()),
        ),
    );

    let fitting = breakers.get_or_create(FITTING_SYNTHESIS);
    let mut tryon = models.virtual_tryon.iter().map(|(label, model)| {
        ModelBinding::new(label.clone(), Arc::clone(model), Arc::clone(&fitting))
    });
    if let Some(first) = tryon.next() {
        let executor = tryon.fold(ModelStepExecutor::new(first), ModelStepExecutor::with_binding);
        registry.register(
            VIRTUAL_TRYON_STEP,
            Arc::new(executor.with_retry_config(retry.clone())),
        );
    }

    registry.register(
        VIDEO_GENERATION_STEP,
        Arc::new(
            ModelStepExecutor::new(ModelBinding::new(
                "A",
                Arc::clone(&models.video),
                breakers.get_or_create(VIDEO_SYNTHESIS),
            ))
            .with_retry_config(retry.clone()),
        ),
    );

    registry
}
