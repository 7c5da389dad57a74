//! Executor that calls remote models through a circuit breaker and retry policy.

use super::mock::MockStepExecutor;
use super::remote::{ModelRequest, ModelResponse, RemoteModel};
use crate::core::{StepOutput, StepResult, TryOnVariant};
use crate::errors::RemoteError;
use crate::pipeline::{StepExecutor, StepInvocation};
use crate::resilience::{with_retry, CircuitBreaker, RetryConfig, RetryPolicy};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One model an executor may call, with the breaker guarding its provider.
#[derive(Debug, Clone)]
pub struct ModelBinding {
    /// Variant label ("A", "B") reported to the approver.
    pub label: String,
    /// The model to call.
    pub model: Arc<dyn RemoteModel>,
    /// Breaker guarding the model's provider.
    pub breaker: Arc<CircuitBreaker>,
}

impl ModelBinding {
    /// Creates a binding.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        model: Arc<dyn RemoteModel>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            label: label.into(),
            model,
            breaker,
        }
    }

    fn matches(&self, hint: &str) -> bool {
        self.label == hint || self.model.model_id() == hint
    }
}

/// Executes a step by calling one or more remote models.
///
/// Each call goes through the binding's circuit breaker and is retried by
/// the configured policy; backoff sleeps end early when the run is
/// cancelled. With A/B comparison enabled and several bindings, all models
/// are called concurrently and every successful one becomes a variant.
#[derive(Debug, Clone)]
pub struct ModelStepExecutor {
    bindings: Vec<ModelBinding>,
    retry: RetryConfig,
    mock: MockStepExecutor,
}

impl ModelStepExecutor {
    /// Creates an executor over a single model.
    #[must_use]
    pub fn new(binding: ModelBinding) -> Self {
        Self {
            bindings: vec![binding],
            retry: RetryConfig::default(),
            mock: MockStepExecutor::new(),
        }
    }

    /// Adds an alternative model.
    #[must_use]
    pub fn with_binding(mut self, binding: ModelBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Sets the per-call retry configuration.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the executor used when `use_mock` is set.
    #[must_use]
    pub fn with_mock(mut self, mock: MockStepExecutor) -> Self {
        self.mock = mock;
        self
    }

    /// Bindings the attempt will call.
    fn select(&self, invocation: &StepInvocation) -> Vec<&ModelBinding> {
        if let Some(hint) = invocation.model_hint.as_deref() {
            if let Some(binding) = self.bindings.iter().find(|b| b.matches(hint)) {
                return vec![binding];
            }
            warn!(step_id = %invocation.step_id, hint, "Model hint matches no binding, using defaults");
        }

        if invocation.config.enable_ab_comparison && self.bindings.len() > 1 {
            self.bindings.iter().collect()
        } else {
            self.bindings.iter().take(1).collect()
        }
    }

    fn policy(&self, invocation: &StepInvocation) -> RetryPolicy<RemoteError> {
        let step_id = invocation.step_id.clone();
        RetryPolicy::new(self.retry.clone())
            .with_cancellation(Arc::clone(&invocation.cancellation))
            .on_retry(move |attempt, error: &RemoteError, delay| {
                warn!(
                    step_id = %step_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Retrying model call"
                );
            })
    }
}

async fn call(
    binding: &ModelBinding,
    request: &ModelRequest,
    policy: &RetryPolicy<RemoteError>,
) -> Result<ModelResponse, RemoteError> {
    let model = &binding.model;
    let breaker = &binding.breaker;
    with_retry(policy, || async move {
        breaker
            .execute_classified(|| model.invoke(request), RemoteError::trips_breaker)
            .await
    })
    .await
}

fn failure(model: &str, error: &RemoteError) -> StepResult {
    let mut result = StepResult::failure(model, error.to_string())
        .with_metadata("error_kind", json!(error.kind()));
    if let RemoteError::CircuitOpen(open) = error {
        result = result
            .with_metadata("breaker", json!(open.breaker))
            .with_metadata(
                "retry_after_ms",
                json!(u64::try_from(open.retry_after.as_millis()).unwrap_or(u64::MAX)),
            );
    }
    result
}

/// Combines per-model outcomes into one try-on result.
fn merge_variants(
    bindings: &[&ModelBinding],
    outcomes: Vec<Result<ModelResponse, RemoteError>>,
    request: &ModelRequest,
) -> StepResult {
    let mut variants = Vec::new();
    let mut models = Vec::new();
    let mut errors = BTreeMap::new();

    for (binding, outcome) in bindings.iter().zip(outcomes) {
        match outcome {
            Ok(response) => match response.output.primary_url() {
                Some(url) => {
                    variants.push(TryOnVariant::new(&binding.label, &response.model, url));
                    models.push(response.model);
                }
                None => {
                    errors.insert(
                        binding.label.clone(),
                        json!({ "error": "model returned no image", "kind": "other" }),
                    );
                }
            },
            Err(err) => {
                errors.insert(
                    binding.label.clone(),
                    json!({ "error": err.to_string(), "kind": err.kind() }),
                );
            }
        }
    }

    if variants.is_empty() {
        let summary = errors
            .iter()
            .map(|(label, e)| format!("{label}: {}", e["error"].as_str().unwrap_or("unknown")))
            .collect::<Vec<_>>()
            .join("; ");
        return StepResult::failure("ab-comparison", format!("All variants failed ({summary})"))
            .with_metadata("variant_errors", json!(errors));
    }

    let urls: Vec<String> = variants.iter().map(|v| v.output_url.clone()).collect();
    let mut result = StepResult::success(models.join(","), StepOutput::VirtualTryOn { variants })
        .with_input_urls(request.source_urls.clone())
        .with_output_urls(urls);
    if !errors.is_empty() {
        result = result.with_metadata("variant_errors", json!(errors));
    }
    result
}

#[async_trait]
impl StepExecutor for ModelStepExecutor {
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult> {
        if invocation.config.use_mock {
            return self.mock.execute(invocation).await;
        }

        let request = match ModelRequest::from_invocation(&invocation) {
            Ok(request) => request,
            Err(message) => {
                let model = self.bindings.first().map_or("none", |b| b.model.model_id());
                return Ok(StepResult::failure(model, message));
            }
        };

        let selected = self.select(&invocation);
        let policy = self.policy(&invocation);
        let started = Instant::now();

        let result = if let [binding] = selected.as_slice() {
            debug!(step_id = %invocation.step_id, model = binding.model.model_id(), "Calling model");
            match call(binding, &request, &policy).await {
                Ok(response) => response.into_step_result(&request),
                Err(err) => failure(binding.model.model_id(), &err),
            }
        } else {
            info!(
                step_id = %invocation.step_id,
                variants = selected.len(),
                "Calling models for A/B comparison"
            );
            let outcomes = join_all(selected.iter().map(|b| call(b, &request, &policy))).await;
            merge_variants(&selected, outcomes, &request)
        };

        Ok(result.with_processing_time_ms(crate::utils::elapsed_ms(started)))
    }
}
