//! End-to-end tests of the orchestrator against scripted and model-backed executors.

use super::*;
use crate::core::{PipelineEvent, PipelineEventKind, PipelineStatus, StepOutput, StepStatus, TryOnVariant};
use crate::errors::{FitflowError, RemoteError};
use crate::events::CollectingEventSink;
use crate::executors::{model_registry, ModelRequest, ModelResponse, ModelSet, RemoteModel};
use crate::resilience::{CircuitBreakerRegistry, CircuitState, RetryConfig, FITTING_SYNTHESIS};
use crate::testing::{
    assert_approval_invariant, assert_event_count, assert_pipeline_status, assert_step_status,
    gated_catalog, sample_inputs, success_result, test_catalog, BlockingExecutor,
    RecordingExecutor, ScriptedExecutor,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_disabled_segmentation_runs_tryon_then_video() {
    let recorder = Arc::new(RecordingExecutor::new());
    let executors = ExecutorRegistry::new()
        .with(VIRTUAL_TRYON_STEP, recorder.clone())
        .with(VIDEO_GENERATION_STEP, recorder.clone());
    let config = PipelineConfig::new().with_segmentation(false).with_video(true);
    let orch = PipelineOrchestrator::new(executors, config);

    let ids: Vec<String> = orch.active_steps().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![VIRTUAL_TRYON_STEP, VIDEO_GENERATION_STEP]);

    let state = orch.start(sample_inputs()).await.unwrap();
    assert_eq!(state.steps.len(), 2);
    assert_pipeline_status(&state, PipelineStatus::AwaitingApproval);

    orch.approve(ApprovalDecision::approve()).await.unwrap();
    let state = orch.approve(ApprovalDecision::approve()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Completed);
    assert_eq!(orch.progress(), 100);
    assert!(state.completed_at.is_some());
    assert_eq!(recorder.steps_called(), vec![VIRTUAL_TRYON_STEP, VIDEO_GENERATION_STEP]);
}

#[tokio::test]
async fn test_step_failing_until_budget_is_spent_fails_pipeline() {
    let segmentation = Arc::new(ScriptedExecutor::always_failing("no mask"));
    let later = Arc::new(RecordingExecutor::new());
    let orch = PipelineOrchestrator::with_catalog(
        test_catalog(2),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, segmentation.clone())
            .with(VIRTUAL_TRYON_STEP, later.clone())
            .with(VIDEO_GENERATION_STEP, later.clone()),
        PipelineConfig::default(),
    );
    let sink = Arc::new(CollectingEventSink::new());
    orch.subscribe(sink.clone());

    let state = orch.start(sample_inputs()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Failed);
    assert_eq!(state.steps[0].result.as_ref().unwrap().error.as_deref(), Some("no mask"));
    assert_eq!(state.steps[0].attempts, 2);
    assert_step_status(&state, SEGMENTATION_STEP, StepStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("no mask"));
    assert_eq!(segmentation.call_count(), 2);
    assert_eq!(later.call_count(), 0);

    assert_event_count(&sink, PipelineEventKind::StepFailed, 2);
    assert_event_count(&sink, PipelineEventKind::StepRetrying, 1);
    assert_event_count(&sink, PipelineEventKind::PipelineFailed, 1);
    assert_eq!(sink.kinds().last(), Some(&PipelineEventKind::PipelineFailed));
}

#[tokio::test]
async fn test_failed_attempt_then_success_continues() {
    let segmentation = Arc::new(
        ScriptedExecutor::new()
            .then_fail("no mask")
            .then(success_result(SEGMENTATION_STEP)),
    );
    let recorder = Arc::new(RecordingExecutor::new());
    let orch = PipelineOrchestrator::with_catalog(
        test_catalog(3),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, segmentation.clone())
            .with(VIRTUAL_TRYON_STEP, recorder.clone())
            .with(VIDEO_GENERATION_STEP, recorder.clone()),
        PipelineConfig::default(),
    );

    let state = orch.start(sample_inputs()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Completed);
    assert_eq!(state.steps[0].attempts, 2);
    assert_eq!(recorder.call_count(), 2);
}

#[tokio::test]
async fn test_approval_gate_suspends_until_decision() {
    let tryon = Arc::new(ScriptedExecutor::new());
    let video = Arc::new(RecordingExecutor::new());
    let orch = PipelineOrchestrator::new(
        ExecutorRegistry::new()
            .with(VIRTUAL_TRYON_STEP, tryon.clone())
            .with(VIDEO_GENERATION_STEP, video.clone()),
        PipelineConfig::new().with_segmentation(false),
    );

    let state = orch.start(sample_inputs()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::AwaitingApproval);
    assert_step_status(&state, VIRTUAL_TRYON_STEP, StepStatus::AwaitingApproval);
    assert_approval_invariant(&state);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(video.call_count(), 0);
    assert_eq!(orch.status(), PipelineStatus::AwaitingApproval);

    let state = orch
        .approve(ApprovalDecision::approve_variant("A").with_feedback("good fit"))
        .await
        .unwrap();

    let tryon_state = state.step(VIRTUAL_TRYON_STEP).unwrap();
    assert_eq!(tryon_state.selected_variant.as_deref(), Some("A"));
    assert_eq!(tryon_state.feedback.as_deref(), Some("good fit"));
    assert_eq!(tryon_state.status, StepStatus::Completed);
    assert!(tryon_state.approved_at.is_some());
    assert_eq!(state.current_step_index, Some(1));
    assert_eq!(video.call_count(), 1);

    let invocation = &video.invocations()[0];
    assert!(invocation.prior(VIRTUAL_TRYON_STEP).is_some());
    assert_eq!(invocation.selected_variant(VIRTUAL_TRYON_STEP), Some("A"));
}

#[tokio::test]
async fn test_cancel_while_running_stops_the_run() {
    let blocking = Arc::new(BlockingExecutor::new(success_result(SEGMENTATION_STEP)));
    let recorder = Arc::new(RecordingExecutor::new());
    let orch = Arc::new(PipelineOrchestrator::with_catalog(
        test_catalog(3),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, blocking.clone())
            .with(VIRTUAL_TRYON_STEP, recorder.clone())
            .with(VIDEO_GENERATION_STEP, recorder.clone()),
        PipelineConfig::default(),
    ));
    let sink = Arc::new(CollectingEventSink::new());
    orch.subscribe(sink.clone());

    let run = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.start(sample_inputs()).await })
    };
    blocking.wait_started().await;
    assert_eq!(orch.status(), PipelineStatus::Running);

    let state = orch.cancel().unwrap();
    assert_pipeline_status(&state, PipelineStatus::Cancelled);
    assert_step_status(&state, SEGMENTATION_STEP, StepStatus::Failed);

    blocking.release();
    let final_state = run.await.unwrap().unwrap();

    assert_pipeline_status(&final_state, PipelineStatus::Cancelled);
    assert_step_status(&final_state, SEGMENTATION_STEP, StepStatus::Failed);
    assert!(final_state.steps[0].result.is_none());
    assert_eq!(recorder.call_count(), 0);
    assert_eq!(sink.kinds().last(), Some(&PipelineEventKind::PipelineCancelled));
    assert_event_count(&sink, PipelineEventKind::StepCompleted, 0);
}

#[tokio::test]
async fn test_approve_outside_gate_is_rejected_without_mutation() {
    let orch = PipelineOrchestrator::with_catalog(
        test_catalog(1),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, Arc::new(RecordingExecutor::new()))
            .with(VIRTUAL_TRYON_STEP, Arc::new(RecordingExecutor::new()))
            .with(VIDEO_GENERATION_STEP, Arc::new(RecordingExecutor::new())),
        PipelineConfig::default(),
    );

    let idle = orch.state();
    let err = orch.approve(ApprovalDecision::approve()).await.unwrap_err();
    assert!(matches!(err, FitflowError::InvalidState { status: PipelineStatus::Idle, .. }));
    assert_eq!(orch.state(), idle);

    orch.start(sample_inputs()).await.unwrap();
    let completed = orch.state();
    for decision in [ApprovalDecision::approve(), ApprovalDecision::reject(), ApprovalDecision::regenerate()] {
        let err = orch.approve(decision).await.unwrap_err();
        assert!(err.is_contract_error());
        assert_eq!(orch.state(), completed);
    }
}

#[tokio::test]
async fn test_cursor_never_moves_backwards() {
    let segmentation = Arc::new(ScriptedExecutor::new().then_fail("blurry"));
    let recorder = Arc::new(RecordingExecutor::new());
    let orch = PipelineOrchestrator::with_catalog(
        gated_catalog(3),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, segmentation)
            .with(VIRTUAL_TRYON_STEP, recorder.clone())
            .with(VIDEO_GENERATION_STEP, recorder),
        PipelineConfig::default(),
    );
    let sink = Arc::new(CollectingEventSink::new());
    orch.subscribe(sink.clone());

    orch.start(sample_inputs()).await.unwrap();
    orch.approve(ApprovalDecision::approve()).await.unwrap();
    orch.approve(ApprovalDecision::regenerate()).await.unwrap();
    orch.retry(None).await.unwrap();
    orch.approve(ApprovalDecision::approve_variant("B")).await.unwrap();
    let state = orch.approve(ApprovalDecision::approve()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Completed);
    assert_eq!(state.step(VIRTUAL_TRYON_STEP).unwrap().attempts, 3);

    let indices: Vec<usize> = sink
        .snapshots()
        .iter()
        .filter(|s| s.status.is_active())
        .filter_map(|s| s.current_step_index)
        .collect();
    assert!(indices.windows(2).all(|w| w[0] <= w[1]), "cursor went backwards: {indices:?}");
    for snapshot in sink.snapshots() {
        assert_approval_invariant(&snapshot);
    }
}

#[tokio::test]
async fn test_listeners_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let orch = PipelineOrchestrator::with_catalog(
        StepCatalog::new(vec![StepDefinition::new("only", "Only")]).unwrap(),
        ExecutorRegistry::new()
            .with("only", Arc::new(RecordingExecutor::new())),
        PipelineConfig::default(),
    );
    for tag in ["first", "second"] {
        let order = Arc::clone(&order);
        orch.subscribe(Arc::new(move |event: &PipelineEvent, _: &PipelineState| {
            order.lock().push(format!("{tag}:{}", event.kind));
        }));
    }

    orch.start(sample_inputs()).await.unwrap();

    let order = order.lock();
    assert_eq!(order[0], "first:pipeline_started");
    assert_eq!(order[1], "second:pipeline_started");
    assert_eq!(order.last().map(String::as_str), Some("second:pipeline_completed"));
}

#[tokio::test]
async fn test_listener_snapshots_are_independent_copies() {
    let orch = PipelineOrchestrator::with_catalog(
        StepCatalog::new(vec![StepDefinition::new("only", "Only").requiring_approval()]).unwrap(),
        ExecutorRegistry::new()
            .with("only", Arc::new(RecordingExecutor::new())),
        PipelineConfig::default(),
    );
    let sink = Arc::new(CollectingEventSink::new());
    orch.subscribe(sink.clone());

    let mut snapshot = orch.start(sample_inputs()).await.unwrap();
    snapshot.status = PipelineStatus::Completed;
    snapshot.steps.clear();

    assert_eq!(orch.status(), PipelineStatus::AwaitingApproval);
    assert_eq!(orch.state().steps.len(), 1);
}

/// A model that answers according to the step it is asked to run.
#[derive(Debug)]
struct FakeModel {
    id: String,
    failure: Option<RemoteError>,
    calls: AtomicU32,
}

impl FakeModel {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failure: None,
            calls: AtomicU32::new(0),
        })
    }

    fn failing(id: &str, failure: RemoteError) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failure: Some(failure),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn tryon_model(label: &str, model: Arc<FakeModel>) -> (String, Arc<dyn RemoteModel>) {
    let model: Arc<dyn RemoteModel> = model;
    (label.to_string(), model)
}

#[async_trait]
impl RemoteModel for FakeModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let base = format!("mem://{}/{}", self.id, request.step_id);
        let output = match request.step_id.as_str() {
            SEGMENTATION_STEP => StepOutput::Segmentation {
                mask_url: format!("{base}/mask.png"),
                segmented_garment_url: format!("{base}/garment.png"),
            },
            VIRTUAL_TRYON_STEP => StepOutput::VirtualTryOn {
                variants: vec![TryOnVariant::new("only", &self.id, format!("{base}/result.png"))],
            },
            _ => StepOutput::Video {
                video_url: format!("{base}/clip.mp4"),
                duration_seconds: 5,
            },
        };
        Ok(ModelResponse::new(self.id.clone(), output))
    }
}

#[tokio::test(start_paused = true)]
async fn test_model_backed_run_with_ab_comparison() {
    let fashn = FakeModel::new("fashn");
    let kolors = FakeModel::failing("kolors", RemoteError::http(400, "unsupported garment"));
    let video = FakeModel::new("kling");
    let models = ModelSet {
        segmentation: FakeModel::new("sam"),
        virtual_tryon: vec![tryon_model("A", fashn.clone()), tryon_model("B", kolors.clone())],
        video: video.clone(),
    };
    let breakers = CircuitBreakerRegistry::with_defaults();
    let orch = PipelineOrchestrator::new(
        model_registry(&models, &breakers, &RetryConfig::default()),
        PipelineConfig::new().with_ab_comparison(true),
    );

    orch.start(sample_inputs()).await.unwrap();
    let state = orch.approve(ApprovalDecision::approve()).await.unwrap();

    let tryon = state.step(VIRTUAL_TRYON_STEP).unwrap().result.clone().unwrap();
    assert!(tryon.is_success());
    assert_eq!(tryon.input_urls[1], "mem://sam/segmentation/garment.png");
    assert!(tryon.metadata["variant_errors"]["B"].is_object());

    let err = orch.approve(ApprovalDecision::approve_variant("B")).await.unwrap_err();
    assert!(matches!(err, FitflowError::UnknownVariant { .. }));

    orch.approve(ApprovalDecision::approve_variant("A")).await.unwrap();
    let state = orch.approve(ApprovalDecision::approve()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Completed);
    let clip = state.step(VIDEO_GENERATION_STEP).unwrap().result.as_ref().unwrap();
    assert_eq!(clip.input_urls, vec!["mem://fashn/virtual-tryon/result.png"]);
    assert_eq!((fashn.calls(), kolors.calls(), video.calls()), (1, 1, 1));
    assert_eq!(breakers.get(FITTING_SYNTHESIS).unwrap().stats().total_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_surfaces_in_step_result() {
    let down = FakeModel::failing("kling", RemoteError::http(503, "overloaded"));
    let models = ModelSet {
        segmentation: FakeModel::new("sam"),
        virtual_tryon: vec![tryon_model("A", FakeModel::new("fashn"))],
        video: down.clone(),
    };
    let breakers = CircuitBreakerRegistry::with_defaults();
    let retry = RetryConfig::new().with_max_retries(5).with_base_delay_ms(10).with_jitter_factor(0.0);
    let orch = PipelineOrchestrator::with_catalog(
        test_catalog(1),
        model_registry(&models, &breakers, &retry),
        PipelineConfig::default(),
    );

    let state = orch.start(sample_inputs()).await.unwrap();

    assert_pipeline_status(&state, PipelineStatus::Failed);
    let video = state.step(VIDEO_GENERATION_STEP).unwrap().result.as_ref().unwrap();
    assert_eq!(video.metadata.get("error_kind"), Some(&serde_json::json!("circuit_open")));
    assert_eq!(down.calls(), 3);
    assert_eq!(
        breakers.get(crate::resilience::VIDEO_SYNTHESIS).unwrap().state(),
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_retry_backoff() {
    let flaky = FakeModel::failing("sam", RemoteError::http(503, "busy"));
    let models = ModelSet {
        segmentation: flaky.clone(),
        virtual_tryon: vec![tryon_model("A", FakeModel::new("fashn"))],
        video: FakeModel::new("kling"),
    };
    let breakers = CircuitBreakerRegistry::with_defaults();
    let retry = RetryConfig::new().with_base_delay_ms(60_000).with_jitter_factor(0.0);
    let orch = Arc::new(PipelineOrchestrator::with_catalog(
        test_catalog(1),
        model_registry(&models, &breakers, &retry),
        PipelineConfig::default(),
    ));

    let run = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.start(sample_inputs()).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    orch.cancel_with_reason("user left").unwrap();

    let state = run.await.unwrap().unwrap();

    assert_pipeline_status(&state, PipelineStatus::Cancelled);
    assert_eq!(state.error.as_deref(), Some("user left"));
    assert_eq!(flaky.calls(), 1);
}

#[tokio::test]
async fn test_cancel_from_another_thread_waits_for_delivery() {
    let recorder = Arc::new(RecordingExecutor::new());
    let orch = Arc::new(PipelineOrchestrator::with_catalog(
        gated_catalog(1),
        ExecutorRegistry::new()
            .with(SEGMENTATION_STEP, recorder.clone())
            .with(VIRTUAL_TRYON_STEP, recorder.clone())
            .with(VIDEO_GENERATION_STEP, recorder),
        PipelineConfig::default(),
    ));

    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let tx = Mutex::new(tx);
    orch.subscribe(Arc::new(move |event: &PipelineEvent, _: &PipelineState| {
        if event.kind == PipelineEventKind::StepCompleted {
            let _ = tx.lock().send(());
            std::thread::sleep(Duration::from_millis(200));
        }
    }));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        orch.subscribe(Arc::new(move |event: &PipelineEvent, state: &PipelineState| {
            seen.lock().push((event.kind, state.status));
        }));
    }

    let canceller = {
        let orch = Arc::clone(&orch);
        std::thread::spawn(move || {
            rx.recv().unwrap();
            orch.cancel().unwrap()
        })
    };

    orch.start(sample_inputs()).await.unwrap();
    let cancelled = canceller.join().unwrap();

    assert_pipeline_status(&cancelled, PipelineStatus::Cancelled);
    assert_eq!(orch.status(), PipelineStatus::Cancelled);
    assert_eq!(
        *seen.lock(),
        vec![
            (PipelineEventKind::PipelineStarted, PipelineStatus::Running),
            (PipelineEventKind::StepStarted, PipelineStatus::Running),
            (PipelineEventKind::StepCompleted, PipelineStatus::AwaitingApproval),
            (PipelineEventKind::AwaitingApproval, PipelineStatus::AwaitingApproval),
            (PipelineEventKind::PipelineCancelled, PipelineStatus::Cancelled),
        ]
    );
}
