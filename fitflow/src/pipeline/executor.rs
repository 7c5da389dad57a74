//! Step executor contract and the registry that maps step ids to executors.

use super::config::PipelineConfig;
use super::state::PipelineInputs;
use crate::cancellation::CancellationToken;
use crate::core::StepResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Everything an executor receives for one attempt.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    /// The step being executed.
    pub step_id: String,
    /// The run the attempt belongs to.
    pub session_id: String,
    /// 1-based attempt number of this step within the run.
    pub attempt: u32,
    /// Caller-supplied parameters.
    pub inputs: PipelineInputs,
    /// Results of every step completed so far, keyed by step id.
    pub prior_results: BTreeMap<String, StepResult>,
    /// Variants the approver selected on earlier steps.
    pub selected_variants: BTreeMap<String, String>,
    /// Run configuration.
    pub config: PipelineConfig,
    /// Preferred model passed to `retry`, consumed by the next attempt.
    pub model_hint: Option<String>,
    /// Cancelled when the run is cancelled or reset.
    pub cancellation: Arc<CancellationToken>,
}

impl StepInvocation {
    /// Returns a prior step's result.
    #[must_use]
    pub fn prior(&self, step_id: &str) -> Option<&StepResult> {
        self.prior_results.get(step_id)
    }

    /// Returns the variant selected on a prior step.
    #[must_use]
    pub fn selected_variant(&self, step_id: &str) -> Option<&str> {
        self.selected_variants.get(step_id).map(String::as_str)
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Performs one stage's work.
///
/// Expected failures (model error, invalid input) are returned as
/// `Ok(StepResult::failure(..))`. `Err` is reserved for unexpected
/// infrastructure faults; the orchestrator records it as a failed attempt.
/// Implementations must tolerate being called again for the same step.
#[async_trait]
pub trait StepExecutor: Send + Sync + Debug {
    /// Executes one attempt of a step.
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult>;
}

/// An executor backed by an async closure.
pub struct FnExecutor<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(StepInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StepResult>> + Send,
{
    /// Creates a new closure executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<StepResult>> + Send,
{
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult> {
        (self.func)(invocation).await
    }
}

/// Maps step ids to executors.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor, replacing any previous one for the step.
    pub fn register(&mut self, step_id: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_id.into(), executor);
    }

    /// Builder form of [`ExecutorRegistry::register`].
    #[must_use]
    pub fn with(mut self, step_id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(step_id, executor);
        self
    }

    /// Returns the executor for a step.
    #[must_use]
    pub fn get(&self, step_id: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_id).cloned()
    }

    /// Returns true if the step has an executor.
    #[must_use]
    pub fn contains(&self, step_id: &str) -> bool {
        self.executors.contains_key(step_id)
    }

    /// Number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
