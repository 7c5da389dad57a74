//! Testing utilities for fitflow pipelines.
//!
//! This module provides:
//! - Scripted, recording and blocking step executors
//! - Fixtures for inputs, catalogs and results
//! - Assertions over pipeline state and emitted events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_approval_invariant, assert_event_count, assert_event_sequence, assert_pipeline_status,
    assert_result_failed, assert_result_succeeded, assert_step_status,
};
pub use fixtures::{gated_catalog, invocation_for, sample_inputs, success_result, test_catalog};
pub use mocks::{BlockingExecutor, RecordingExecutor, ScriptedExecutor};
