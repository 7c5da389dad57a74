//! Pipeline lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The kind of lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// A run was started.
    PipelineStarted,
    /// A step executor is about to be invoked.
    StepStarted,
    /// A step executor returned success.
    StepCompleted,
    /// A step attempt failed.
    StepFailed,
    /// A failed step is being re-executed automatically.
    StepRetrying,
    /// The run is suspended for a human decision.
    AwaitingApproval,
    /// A step's output was approved.
    StepApproved,
    /// A step's output was rejected (or sent back for regeneration).
    StepRejected,
    /// Every active step completed.
    PipelineCompleted,
    /// The run ended in failure.
    PipelineFailed,
    /// The caller cancelled the run.
    PipelineCancelled,
}

impl PipelineEventKind {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline_started",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepRetrying => "step_retrying",
            Self::AwaitingApproval => "awaiting_approval",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::PipelineCompleted => "pipeline_completed",
            Self::PipelineFailed => "pipeline_failed",
            Self::PipelineCancelled => "pipeline_cancelled",
        }
    }
}

impl fmt::Display for PipelineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by the orchestrator on a state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    pub kind: PipelineEventKind,

    /// The run the event belongs to.
    pub session_id: String,

    /// The step involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn new(kind: PipelineEventKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            step_id: None,
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Creates a step-level event.
    #[must_use]
    pub fn for_step(
        kind: PipelineEventKind,
        session_id: impl Into<String>,
        step_id: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(kind, session_id);
        event.step_id = Some(step_id.into());
        event
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Converts the event to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind.as_str()));
        map.insert("session_id".to_string(), serde_json::json!(self.session_id));
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));

        if let Some(ref step_id) = self.step_id {
            map.insert("step_id".to_string(), serde_json::json!(step_id));
        }
        if !self.data.is_empty() {
            let data_map: serde_json::Map<String, serde_json::Value> =
                self.data.clone().into_iter().collect();
            map.insert("data".to_string(), serde_json::Value::Object(data_map));
        }

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(PipelineEventKind::StepStarted.as_str(), "step_started");
        assert_eq!(PipelineEventKind::AwaitingApproval.to_string(), "awaiting_approval");
        assert_eq!(
            serde_json::to_string(&PipelineEventKind::PipelineCancelled).unwrap(),
            r#""pipeline_cancelled""#
        );
    }

    #[test]
    fn test_step_event() {
        let event = PipelineEvent::for_step(PipelineEventKind::StepFailed, "s-1", "segmentation")
            .add_data("error", serde_json::json!("no mask"));

        assert_eq!(event.step_id.as_deref(), Some("segmentation"));
        assert_eq!(event.get("error"), Some(&serde_json::json!("no mask")));
    }

    #[test]
    fn test_to_dict() {
        let run_event = PipelineEvent::new(PipelineEventKind::PipelineCompleted, "s-1");
        let dict = run_event.to_dict();
        assert_eq!(dict.get("type").unwrap(), "pipeline_completed");
        assert!(!dict.contains_key("step_id"));
        assert!(!dict.contains_key("data"));
    }
}
