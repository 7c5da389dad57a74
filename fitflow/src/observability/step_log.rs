//! Structured step log records and the artifact persistence boundary.

use crate::core::{PipelineEvent, PipelineEventKind, StepResult};
use crate::events::EventSink;
use crate::pipeline::PipelineState;
use crate::utils::Timestamp;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// One line of the per-step execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLogRecord {
    /// Run the step belongs to.
    pub session_id: String,
    /// Step that completed.
    pub step_id: String,
    /// Model (or models) that produced the output.
    pub model_used: String,
    /// Wall-clock time of the attempt.
    pub processing_time_ms: u64,
    /// Resources the attempt produced.
    pub output_urls: Vec<String>,
    /// Result metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the record was written.
    pub timestamp: Timestamp,
}

impl StepLogRecord {
    /// Builds a record from a step result.
    #[must_use]
    pub fn from_result(session_id: &str, step_id: &str, result: &StepResult) -> Self {
        Self {
            session_id: session_id.to_string(),
            step_id: step_id.to_string(),
            model_used: result.model_used.clone(),
            processing_time_ms: result.processing_time_ms,
            output_urls: result.output_urls.clone(),
            metadata: result.metadata.clone(),
            timestamp: result.timestamp,
        }
    }

    /// Serializes the record as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if a metadata value cannot be serialized.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event sink that turns every completed step into a [`StepLogRecord`].
///
/// Records are logged under the `fitflow::step_log` target and kept in
/// memory for the host to persist.
#[derive(Debug, Default)]
pub struct StepLogSink {
    records: RwLock<Vec<StepLogRecord>>,
}

impl StepLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all records so far.
    #[must_use]
    pub fn records(&self) -> Vec<StepLogRecord> {
        self.records.read().clone()
    }

    /// Removes and returns all records.
    pub fn drain(&self) -> Vec<StepLogRecord> {
        std::mem::take(&mut *self.records.write())
    }
}

impl EventSink for StepLogSink {
    fn emit(&self, event: &PipelineEvent, state: &PipelineState) {
        if event.kind != PipelineEventKind::StepCompleted {
            return;
        }
        let Some(step_id) = event.step_id.as_deref() else {
            return;
        };
        let Some(result) = state.step(step_id).and_then(|s| s.result.as_ref()) else {
            return;
        };

        let record = StepLogRecord::from_result(&state.session_id, step_id, result);
        match record.to_json_line() {
            Ok(line) => info!(target: "fitflow::step_log", "{line}"),
            Err(err) => info!(target: "fitflow::step_log", error = %err, step_id, "Unserializable step record"),
        }
        self.records.write().push(record);
    }
}

/// Storage for step artifacts, implemented by the host.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persists the artifacts of one step and returns their stored locations.
    async fn persist(&self, session_id: &str, step_id: &str, urls: &[String]) -> anyhow::Result<Vec<String>>;
}

/// Persists the outputs of every completed step in `state`.
///
/// Returns the stored locations keyed by step id.
///
/// # Errors
///
/// Stops at and returns the first store error.
pub async fn persist_completed_outputs(
    store: &dyn ArtifactStore,
    state: &PipelineState,
) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stored = HashMap::new();
    for (step_id, result) in state.completed_results() {
        if result.output_urls.is_empty() {
            continue;
        }
        let locations = store
            .persist(&state.session_id, &step_id, &result.output_urls)
            .await?;
        stored.insert(step_id, locations);
    }
    Ok(stored)
}
