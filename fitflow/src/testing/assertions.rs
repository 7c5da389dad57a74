//! Test assertions for pipeline state and events.

use crate::core::{PipelineEventKind, PipelineStatus, StepResult, StepStatus};
use crate::events::CollectingEventSink;
use crate::pipeline::PipelineState;

/// Asserts that the pipeline has the expected status.
pub fn assert_pipeline_status(state: &PipelineState, expected: PipelineStatus) {
    assert_eq!(
        state.status, expected,
        "Expected pipeline status {:?}, got {:?} (error: {:?})",
        expected, state.status, state.error
    );
}

/// Asserts that a step has the expected status.
pub fn assert_step_status(state: &PipelineState, step_id: &str, expected: StepStatus) {
    let step = state
        .step(step_id)
        .unwrap_or_else(|| panic!("Step '{step_id}' is not part of the run"));
    assert_eq!(
        step.status, expected,
        "Expected step '{}' to be {:?}, got {:?}",
        step_id, expected, step.status
    );
}

/// Asserts that the approval invariant holds.
pub fn assert_approval_invariant(state: &PipelineState) {
    assert!(
        state.approval_invariant_holds(),
        "Pipeline is {:?} but current step is {:?}",
        state.status,
        state.current_step().map(|s| s.status)
    );
}

/// Asserts that a result indicates success.
pub fn assert_result_succeeded(result: &StepResult) {
    assert!(
        result.is_success(),
        "Expected success, got error: {:?}",
        result.error
    );
}

/// Asserts that a result failed with the given error.
pub fn assert_result_failed(result: &StepResult, error: &str) {
    assert!(!result.is_success(), "Expected failure, got success");
    assert_eq!(result.error.as_deref(), Some(error));
}

/// Asserts that the sink saw exactly these event kinds, in order.
pub fn assert_event_sequence(sink: &CollectingEventSink, expected: &[PipelineEventKind]) {
    let actual = sink.kinds();
    assert_eq!(
        actual.as_slice(),
        expected,
        "Event sequence mismatch"
    );
}

/// Asserts that the sink saw `count` events of `kind`.
pub fn assert_event_count(sink: &CollectingEventSink, kind: PipelineEventKind, count: usize) {
    let actual = sink.events_of_kind(kind).len();
    assert_eq!(
        actual, count,
        "Expected {count} '{kind}' events, got {actual}"
    );
}
