//! The pipeline state machine.
//!
//! A [`PipelineOrchestrator`] walks the active steps of its catalog in
//! order, invoking one executor per step. After a successful step it either
//! continues or suspends in `awaiting_approval` and returns to the caller;
//! the run resumes only through [`approve`](PipelineOrchestrator::approve)
//! or [`retry`](PipelineOrchestrator::retry). Failed attempts are retried
//! in place while the step's budget lasts.
//!
//! State lives behind a mutex that is never held across an `.await`. Each
//! operation mutates the state, releases the lock and then delivers the
//! resulting events, each with a deep snapshot taken at the point it was
//! raised, to every registered sink. A separate reentrant delivery lock is
//! held from the mutation until the last sink returns, so sinks observe
//! transitions in the order they happened even when another task cancels
//! concurrently. A caller may cancel from another task while an executor is
//! in flight; the late result is discarded.

use super::config::PipelineConfig;
use super::executor::{ExecutorRegistry, StepExecutor, StepInvocation};
use super::state::{ApprovalDecision, PipelineInputs, PipelineState, PipelineStepState};
use super::steps::{StepCatalog, StepDefinition};
use crate::cancellation::CancellationToken;
use crate::core::{
    PipelineEvent, PipelineEventKind, PipelineStatus, StepOutput, StepResult, StepStatus,
};
use crate::errors::FitflowError;
use crate::events::EventSink;
use crate::utils::{elapsed_ms, generate_session_id, now_utc};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

/// Events raised by one transition, waiting for delivery.
#[derive(Default)]
struct Outbox {
    pending: Vec<PipelineEvent>,
    sealed: Vec<(PipelineEvent, PipelineState)>,
}

impl Outbox {
    fn push(&mut self, event: PipelineEvent) {
        self.pending.push(event);
    }

    /// Binds every pending event to `state` as it stands now.
    fn seal(&mut self, state: &PipelineState) {
        if self.pending.is_empty() {
            return;
        }
        let snapshot = state.clone();
        self.sealed
            .extend(self.pending.drain(..).map(|event| (event, snapshot.clone())));
    }
}

struct RunState {
    state: PipelineState,
    definitions: Vec<StepDefinition>,
    token: Arc<CancellationToken>,
    model_hint: Option<String>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            state: PipelineState::idle(),
            definitions: Vec::new(),
            token: Arc::new(CancellationToken::new()),
            model_hint: None,
        }
    }

    fn belongs_to(&self, session_id: &str) -> bool {
        self.state.session_id == session_id
    }

    fn current_definition(&self) -> Option<&StepDefinition> {
        self.state
            .current_step_index
            .and_then(|i| self.definitions.get(i))
    }
}

/// Drives one pipeline run at a time.
///
/// Share it through an `Arc` when another task needs to cancel or observe
/// a run in progress.
pub struct PipelineOrchestrator {
    catalog: StepCatalog,
    executors: ExecutorRegistry,
    config: PipelineConfig,
    run: Mutex<RunState>,
    delivery: ReentrantMutex<()>,
    listeners: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("catalog", &self.catalog)
            .field("config", &self.config)
            .field("status", &self.status())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over the standard step catalog.
    #[must_use]
    pub fn new(executors: ExecutorRegistry, config: PipelineConfig) -> Self {
        Self::with_catalog(StepCatalog::standard(), executors, config)
    }

    /// Creates an orchestrator over a custom catalog.
    #[must_use]
    pub fn with_catalog(
        catalog: StepCatalog,
        executors: ExecutorRegistry,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            executors,
            config,
            run: Mutex::new(RunState::idle()),
            delivery: ReentrantMutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers an event sink. Sinks are called in registration order.
    ///
    /// Sinks run synchronously on the task that made the transition. A sink
    /// may query or drive this orchestrator itself, but must not block on
    /// another thread that does.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.listeners.write().push(sink);
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The step catalog.
    #[must_use]
    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// Steps a run started now would execute.
    #[must_use]
    pub fn active_steps(&self) -> Vec<StepDefinition> {
        self.catalog.active_steps(&self.config)
    }

    /// A deep snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.run.lock().state.clone()
    }

    /// The current pipeline status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.run.lock().state.status
    }

    /// The session id of the current run, if one was started.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let run = self.run.lock();
        (!run.state.session_id.is_empty()).then(|| run.state.session_id.clone())
    }

    /// A snapshot of the step under the cursor.
    #[must_use]
    pub fn current_step(&self) -> Option<PipelineStepState> {
        self.run.lock().state.current_step().cloned()
    }

    /// Completed steps as an integer percentage of active steps.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.run.lock().state.progress()
    }

    /// Starts a new run and executes until it suspends or ends.
    ///
    /// # Errors
    ///
    /// - [`FitflowError::InvalidState`] if a run is already in progress
    /// - [`FitflowError::Configuration`] if the configuration disables every step
    /// - [`FitflowError::MissingExecutor`] if an active step has no executor
    pub async fn start(&self, inputs: PipelineInputs) -> Result<PipelineState, FitflowError> {
        let session_id = self.mutate(|run, events| {
            let status = run.state.status;
            if status.is_active() {
                return Err(FitflowError::invalid_state("start", status));
            }

            let definitions = self.catalog.active_steps(&self.config);
            if definitions.is_empty() {
                return Err(FitflowError::Configuration(
                    "configuration disables every pipeline step".to_string(),
                ));
            }
            if let Some(missing) = definitions.iter().find(|d| !self.executors.contains(&d.id)) {
                return Err(FitflowError::MissingExecutor(missing.id.clone()));
            }

            let session_id = generate_session_id();
            let step_ids: Vec<&str> = definitions.iter().map(|d| d.id.as_str()).collect();
            events.push(
                PipelineEvent::new(PipelineEventKind::PipelineStarted, &session_id)
                    .add_data("steps", json!(step_ids)),
            );

            run.state = PipelineState {
                session_id: session_id.clone(),
                current_step_index: Some(0),
                steps: definitions
                    .iter()
                    .map(|d| PipelineStepState::pending(&d.id))
                    .collect(),
                started_at: Some(now_utc()),
                completed_at: None,
                status: PipelineStatus::Running,
                inputs: Some(inputs),
                error: None,
            };
            run.definitions = definitions;
            run.token = Arc::new(CancellationToken::new());
            run.model_hint = None;
            Ok(session_id)
        })?;

        info!(session_id = %session_id, "Pipeline started");
        self.run_loop(&session_id).await;
        Ok(self.state())
    }

    /// Applies a human decision to the step awaiting approval.
    ///
    /// Approval advances to the next step, `regenerate` re-executes the same
    /// step and anything else rejects the step, failing the run. When
    /// `approved` is set it wins over `regenerate`.
    ///
    /// # Errors
    ///
    /// - [`FitflowError::InvalidState`] unless the run is awaiting approval
    /// - [`FitflowError::UnknownVariant`] if the selected variant was not produced
    /// - [`FitflowError::RetriesExhausted`] when regenerating without budget
    ///
    /// No state is changed when an error is returned.
    pub async fn approve(&self, decision: ApprovalDecision) -> Result<PipelineState, FitflowError> {
        let (session_id, resume) = self.mutate(|run, events| {
            let status = run.state.status;
            if status != PipelineStatus::AwaitingApproval {
                return Err(FitflowError::invalid_state("approve", status));
            }
            let definition = run
                .current_definition()
                .cloned()
                .ok_or_else(|| FitflowError::invalid_state("approve", status))?;
            let session_id = run.state.session_id.clone();
            let now = now_utc();

            if decision.approved {
                let step = run
                    .state
                    .current_step_mut()
                    .ok_or_else(|| FitflowError::invalid_state("approve", status))?;
                if let Some(label) = &decision.selected_variant {
                    check_variant(step, label)?;
                }
                step.status = StepStatus::Completed;
                step.approved_at = Some(now);
                step.feedback.clone_from(&decision.feedback);
                step.selected_variant.clone_from(&decision.selected_variant);

                events.push(
                    PipelineEvent::for_step(PipelineEventKind::StepApproved, &session_id, &definition.id)
                        .add_data("auto", json!(false))
                        .add_data("selected_variant", json!(decision.selected_variant))
                        .add_data("feedback", json!(decision.feedback)),
                );
                run.state.status = PipelineStatus::Running;
                events.seal(&run.state);
                let more = advance(&mut run.state, events);
                return Ok((session_id, more));
            }

            let step = run
                .state
                .current_step_mut()
                .ok_or_else(|| FitflowError::invalid_state("approve", status))?;

            if decision.regenerate {
                if !definition.has_retry_budget(step.attempts) {
                    return Err(retries_exhausted(&definition, step.attempts));
                }
                step.status = StepStatus::Pending;
                step.rejected_at = Some(now);
                step.feedback.clone_from(&decision.feedback);
                step.selected_variant = None;
                run.state.status = PipelineStatus::Running;
                events.push(
                    PipelineEvent::for_step(PipelineEventKind::StepRejected, &session_id, &definition.id)
                        .add_data("regenerate", json!(true))
                        .add_data("feedback", json!(decision.feedback)),
                );
                return Ok((session_id, true));
            }

            step.status = StepStatus::Rejected;
            step.rejected_at = Some(now);
            step.feedback.clone_from(&decision.feedback);
            let error = decision
                .feedback
                .clone()
                .unwrap_or_else(|| format!("Step '{}' rejected", definition.id));

            run.state.status = PipelineStatus::Failed;
            run.state.completed_at = Some(now);
            run.state.error = Some(error.clone());
            run.token.cancel("step rejected");
            events.push(
                PipelineEvent::for_step(PipelineEventKind::StepRejected, &session_id, &definition.id)
                    .add_data("regenerate", json!(false))
                    .add_data("feedback", json!(decision.feedback)),
            );
            events.push(
                PipelineEvent::for_step(PipelineEventKind::PipelineFailed, &session_id, &definition.id)
                    .add_data("error", json!(error))
                    .add_data("reason", json!("rejected")),
            );
            Ok((session_id, false))
        })?;

        if resume {
            self.run_loop(&session_id).await;
        }
        Ok(self.state())
    }

    /// Re-executes the step awaiting approval, optionally preferring a model.
    ///
    /// # Errors
    ///
    /// - [`FitflowError::InvalidState`] unless the run is awaiting approval
    /// - [`FitflowError::RetriesExhausted`] if the step has no budget left
    pub async fn retry(&self, model_hint: Option<String>) -> Result<PipelineState, FitflowError> {
        let session_id = self.mutate(|run, events| {
            let status = run.state.status;
            if status != PipelineStatus::AwaitingApproval {
                return Err(FitflowError::invalid_state("retry", status));
            }
            let definition = run
                .current_definition()
                .cloned()
                .ok_or_else(|| FitflowError::invalid_state("retry", status))?;
            let session_id = run.state.session_id.clone();
            let step = run
                .state
                .current_step_mut()
                .ok_or_else(|| FitflowError::invalid_state("retry", status))?;
            if !definition.has_retry_budget(step.attempts) {
                return Err(retries_exhausted(&definition, step.attempts));
            }

            step.status = StepStatus::Pending;
            step.selected_variant = None;
            let next_attempt = step.attempts + 1;
            run.state.status = PipelineStatus::Running;
            events.push(
                PipelineEvent::for_step(PipelineEventKind::StepRetrying, &session_id, &definition.id)
                    .add_data("trigger", json!("manual"))
                    .add_data("attempt", json!(next_attempt))
                    .add_data("model_hint", json!(model_hint)),
            );
            run.model_hint = model_hint;
            Ok(session_id)
        })?;

        self.run_loop(&session_id).await;
        Ok(self.state())
    }

    /// Cancels the run in progress.
    ///
    /// # Errors
    ///
    /// [`FitflowError::InvalidState`] unless a run is in progress.
    pub fn cancel(&self) -> Result<PipelineState, FitflowError> {
        self.cancel_with_reason(DEFAULT_CANCEL_REASON)
    }

    /// Cancels the run in progress, recording `reason` as the run error.
    ///
    /// An executor call already in flight is not interrupted; its result is
    /// discarded when it arrives. The run's cancellation token fires, so
    /// executors that watch it stop retrying.
    ///
    /// # Errors
    ///
    /// [`FitflowError::InvalidState`] unless a run is in progress.
    pub fn cancel_with_reason(&self, reason: &str) -> Result<PipelineState, FitflowError> {
        self.mutate(|run, events| {
            let status = run.state.status;
            if !status.is_active() {
                return Err(FitflowError::invalid_state("cancel", status));
            }
            let now = now_utc();
            let step_id = run.state.current_step_mut().map(|step| {
                if matches!(step.status, StepStatus::Running | StepStatus::AwaitingApproval) {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(now);
                }
                step.step_id.clone()
            });

            run.state.status = PipelineStatus::Cancelled;
            run.state.completed_at = Some(now);
            run.state.error = Some(reason.to_string());
            run.token.cancel(reason);

            let mut event = PipelineEvent::new(PipelineEventKind::PipelineCancelled, &run.state.session_id)
                .add_data("reason", json!(reason));
            event.step_id = step_id;
            events.push(event);
            Ok(())
        })?;

        info!(reason, "Pipeline cancelled");
        Ok(self.state())
    }

    /// Discards the current run and returns to idle.
    pub fn reset(&self) {
        let mut run = self.run.lock();
        run.token.cancel("pipeline reset");
        *run = RunState::idle();
        debug!("Pipeline reset");
    }

    /// Rehydrates the orchestrator from a saved snapshot.
    ///
    /// # Errors
    ///
    /// - [`FitflowError::InvalidState`] if a run is in progress or the snapshot
    ///   was taken while a step was executing
    /// - [`FitflowError::UnknownStep`] if the snapshot names a step outside the catalog
    /// - [`FitflowError::MissingExecutor`] if a restored step has no executor
    /// - [`FitflowError::Configuration`] if the snapshot is internally inconsistent
    pub fn restore(&self, snapshot: PipelineState) -> Result<(), FitflowError> {
        let mut run = self.run.lock();
        if run.state.status.is_active() {
            return Err(FitflowError::invalid_state("restore", run.state.status));
        }
        if snapshot.status == PipelineStatus::Running {
            return Err(FitflowError::invalid_state("restore", snapshot.status));
        }

        let definitions = snapshot
            .steps
            .iter()
            .map(|s| {
                self.catalog
                    .get(&s.step_id)
                    .cloned()
                    .ok_or_else(|| FitflowError::UnknownStep(s.step_id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(missing) = definitions.iter().find(|d| !self.executors.contains(&d.id)) {
            return Err(FitflowError::MissingExecutor(missing.id.clone()));
        }
        if !snapshot.approval_invariant_holds() {
            return Err(FitflowError::Configuration(
                "snapshot status disagrees with the status of its current step".to_string(),
            ));
        }
        if snapshot.status == PipelineStatus::AwaitingApproval && snapshot.inputs.is_none() {
            return Err(FitflowError::Configuration(
                "snapshot awaiting approval has no inputs".to_string(),
            ));
        }

        info!(session_id = %snapshot.session_id, status = %snapshot.status, "Pipeline restored");
        *run = RunState {
            state: snapshot,
            definitions,
            token: Arc::new(CancellationToken::new()),
            model_hint: None,
        };
        Ok(())
    }

    async fn run_loop(&self, session_id: &str) {
        while let Some((executor, invocation)) = self.prepare_attempt(session_id) {
            let step_id = invocation.step_id.clone();
            let span = info_span!(
                "step",
                session_id,
                step_id = %step_id,
                attempt = invocation.attempt
            );
            let started = Instant::now();
            let result = match executor.execute(invocation).instrument(span).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(session_id, step_id = %step_id, error = %err, "Step executor faulted");
                    StepResult::failure("unknown", format!("{err:#}"))
                        .with_processing_time_ms(elapsed_ms(started))
                        .with_metadata("error_kind", json!("executor_fault"))
                }
            };

            if !self.apply_result(session_id, result) {
                break;
            }
        }
    }

    fn prepare_attempt(&self, session_id: &str) -> Option<(Arc<dyn StepExecutor>, StepInvocation)> {
        self.mutate(|run, events| {
            if !run.belongs_to(session_id) || run.state.status != PipelineStatus::Running {
                return None;
            }
            let definition = run.current_definition()?.clone();
            let executor = self.executors.get(&definition.id)?;
            let inputs = run.state.inputs.clone()?;
            let prior_results = run.state.completed_results();
            let selected_variants = run.state.selected_variants();
            let model_hint = run.model_hint.take();
            let cancellation = Arc::clone(&run.token);

            let step = run.state.current_step_mut()?;
            step.status = StepStatus::Running;
            step.started_at = Some(now_utc());
            step.completed_at = None;
            step.attempts += 1;
            let attempt = step.attempts;

            debug!(session_id, step_id = %definition.id, attempt, "Step started");
            events.push(
                PipelineEvent::for_step(PipelineEventKind::StepStarted, session_id, &definition.id)
                    .add_data("attempt", json!(attempt))
                    .add_data("name", json!(definition.name)),
            );

            Some((
                executor,
                StepInvocation {
                    step_id: definition.id,
                    session_id: session_id.to_string(),
                    attempt,
                    inputs,
                    prior_results,
                    selected_variants,
                    config: self.config.clone(),
                    model_hint,
                    cancellation,
                },
            ))
        })
    }

    /// Records an attempt's result. Returns true if the loop should run again.
    fn apply_result(&self, session_id: &str, result: StepResult) -> bool {
        self.mutate(|run, events| {
            if !run.belongs_to(session_id) || run.state.status != PipelineStatus::Running {
                debug!(session_id, "Discarding result of an attempt the run no longer waits for");
                return false;
            }
            let Some(definition) = run.current_definition().cloned() else {
                return false;
            };
            let Some(step) = run.state.current_step_mut() else {
                return false;
            };
            let now = now_utc();

            if result.success {
                step.completed_at = Some(now);
                events.push(
                    PipelineEvent::for_step(PipelineEventKind::StepCompleted, session_id, &definition.id)
                        .add_data("model_used", json!(result.model_used))
                        .add_data("processing_time_ms", json!(result.processing_time_ms))
                        .add_data("output_urls", json!(result.output_urls)),
                );
                let variants = variant_labels(result.data.as_ref());
                step.result = Some(result);

                if definition.needs_approval() {
                    step.status = StepStatus::AwaitingApproval;
                    run.state.status = PipelineStatus::AwaitingApproval;
                    info!(session_id, step_id = %definition.id, "Awaiting approval");
                    events.push(
                        PipelineEvent::for_step(PipelineEventKind::AwaitingApproval, session_id, &definition.id)
                            .add_data("variants", json!(variants)),
                    );
                    return false;
                }

                step.status = StepStatus::Completed;
                step.approved_at = Some(now);
                events.push(
                    PipelineEvent::for_step(PipelineEventKind::StepApproved, session_id, &definition.id)
                        .add_data("auto", json!(true)),
                );
                events.seal(&run.state);
                return advance(&mut run.state, events);
            }

            let error = result
                .error
                .clone()
                .unwrap_or_else(|| format!("Step '{}' failed", definition.id));
            let attempts = step.attempts;
            step.status = StepStatus::Failed;
            step.completed_at = Some(now);
            step.result = Some(result);
            warn!(session_id, step_id = %definition.id, attempt = attempts, error = %error, "Step failed");
            events.push(
                PipelineEvent::for_step(PipelineEventKind::StepFailed, session_id, &definition.id)
                    .add_data("error", json!(error))
                    .add_data("attempt", json!(attempts)),
            );

            if definition.has_retry_budget(attempts) {
                events.push(
                    PipelineEvent::for_step(PipelineEventKind::StepRetrying, session_id, &definition.id)
                        .add_data("trigger", json!("automatic"))
                        .add_data("attempt", json!(attempts + 1)),
                );
                return true;
            }

            run.state.status = PipelineStatus::Failed;
            run.state.completed_at = Some(now);
            run.state.error = Some(error.clone());
            warn!(session_id, step_id = %definition.id, "Pipeline failed");
            events.push(
                PipelineEvent::for_step(PipelineEventKind::PipelineFailed, session_id, &definition.id)
                    .add_data("error", json!(error))
                    .add_data("reason", json!("retries_exhausted")),
            );
            false
        })
    }

    /// Runs `f` under the state lock, then delivers the events it queued.
    ///
    /// The delivery lock is taken before the state lock and released only
    /// after dispatch, so batches reach sinks in transition order.
    fn mutate<R>(&self, f: impl FnOnce(&mut RunState, &mut Outbox) -> R) -> R {
        let _delivery = self.delivery.lock();
        let mut outbox = Outbox::default();
        let out = {
            let mut run = self.run.lock();
            let out = f(&mut run, &mut outbox);
            outbox.seal(&run.state);
            out
        };
        self.dispatch(&outbox.sealed);
        out
    }

    fn dispatch(&self, batch: &[(PipelineEvent, PipelineState)]) {
        if batch.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for (event, snapshot) in batch {
            for listener in &listeners {
                let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener.emit(event, snapshot);
                }));
                if delivered.is_err() {
                    warn!(event_type = %event.kind, "Event sink panicked");
                }
            }
        }
    }
}

/// Moves the cursor past the current step. Returns true if a step remains.
fn advance(state: &mut PipelineState, events: &mut Outbox) -> bool {
    let next = state.current_step_index.map_or(0, |i| i + 1);
    if next < state.steps.len() {
        state.current_step_index = Some(next);
        return true;
    }

    state.status = PipelineStatus::Completed;
    state.completed_at = Some(now_utc());
    info!(session_id = %state.session_id, "Pipeline completed");
    events.push(
        PipelineEvent::new(PipelineEventKind::PipelineCompleted, &state.session_id)
            .add_data("progress", json!(state.progress())),
    );
    false
}

fn check_variant(step: &PipelineStepState, label: &str) -> Result<(), FitflowError> {
    let output = step.result.as_ref().and_then(|r| r.data.as_ref());
    match output {
        Some(out @ StepOutput::VirtualTryOn { .. }) if out.variant(label).is_none() => {
            Err(FitflowError::UnknownVariant {
                step_id: step.step_id.clone(),
                variant: label.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn variant_labels(output: Option<&StepOutput>) -> Vec<String> {
    match output {
        Some(StepOutput::VirtualTryOn { variants }) => {
            variants.iter().map(|v| v.label.clone()).collect()
        }
        _ => Vec::new(),
    }
}

fn retries_exhausted(definition: &StepDefinition, attempts: u32) -> FitflowError {
    FitflowError::RetriesExhausted {
        step_id: definition.id.clone(),
        attempts,
        max_retries: definition.max_retries,
    }
}
