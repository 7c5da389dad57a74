//! Run state, caller inputs and approval decisions.

use crate::core::{PipelineStatus, StepResult, StepStatus};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Garment category the try-on models condition on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GarmentCategory {
    /// Tops, shirts, jackets.
    #[default]
    UpperBody,
    /// Trousers, skirts.
    LowerBody,
    /// Full-length garments.
    Dresses,
}

/// Caller-supplied parameters of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInputs {
    /// Garment category, which selects model parameters.
    pub category: GarmentCategory,
    /// Photo of the person to dress.
    pub person_image_url: String,
    /// Photo of the garment.
    pub garment_image_url: String,
    /// Optional pose keypoints for the person image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_data: Option<serde_json::Value>,
    /// Free-form parameters forwarded to executors.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl PipelineInputs {
    /// Creates inputs for a person/garment pair.
    #[must_use]
    pub fn new(
        category: GarmentCategory,
        person_image_url: impl Into<String>,
        garment_image_url: impl Into<String>,
    ) -> Self {
        Self {
            category,
            person_image_url: person_image_url.into(),
            garment_image_url: garment_image_url.into(),
            pose_data: None,
            parameters: HashMap::new(),
        }
    }

    /// Attaches pose keypoints.
    #[must_use]
    pub fn with_pose_data(mut self, pose: serde_json::Value) -> Self {
        self.pose_data = Some(pose);
        self
    }

    /// Adds a free-form parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Progress of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStepState {
    /// Catalog id of the step.
    pub step_id: String,
    /// Lifecycle status.
    pub status: StepStatus,
    /// The most recent attempt's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    /// Incremented once per execution attempt.
    pub attempts: u32,
    /// Start of the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// End of the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// When the approver accepted the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<Timestamp>,
    /// When the approver last rejected or regenerated the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<Timestamp>,
    /// Free text from the approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Variant chosen when the step produced several candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_variant: Option<String>,
}

impl PipelineStepState {
    /// Creates a pending step state.
    #[must_use]
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            result: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            approved_at: None,
            rejected_at: None,
            feedback: None,
            selected_variant: None,
        }
    }

    /// Returns the last attempt's error, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// The full state of one pipeline run.
///
/// Snapshots handed out by the orchestrator are deep copies; mutating one
/// has no effect on the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Run identifier, issued fresh on every start.
    pub session_id: String,
    /// Cursor into `steps`; `None` before the run starts.
    pub current_step_index: Option<usize>,
    /// One entry per active step, in execution order.
    pub steps: Vec<PipelineStepState>,
    /// When the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Overall status.
    pub status: PipelineStatus,
    /// Inputs of the current run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<PipelineInputs>,
    /// Why the run failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::idle()
    }
}

impl PipelineState {
    /// An empty state with no session.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            session_id: String::new(),
            current_step_index: None,
            steps: Vec::new(),
            started_at: None,
            completed_at: None,
            status: PipelineStatus::Idle,
            inputs: None,
            error: None,
        }
    }

    /// Returns the step under the cursor.
    #[must_use]
    pub fn current_step(&self) -> Option<&PipelineStepState> {
        self.current_step_index.and_then(|i| self.steps.get(i))
    }

    pub(crate) fn current_step_mut(&mut self) -> Option<&mut PipelineStepState> {
        self.current_step_index.and_then(|i| self.steps.get_mut(i))
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&PipelineStepState> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Number of steps whose output has been accepted.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_done()).count()
    }

    /// Completed steps as a rounded integer percentage; 0 with no steps.
    #[must_use]
    pub fn progress(&self) -> u8 {
        let total = self.steps.len();
        if total == 0 {
            return 0;
        }
        let pct = (self.completed_count() * 100 + total / 2) / total;
        u8::try_from(pct).unwrap_or(100)
    }

    /// Results of every completed step, keyed by step id.
    #[must_use]
    pub fn completed_results(&self) -> BTreeMap<String, StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status.is_done())
            .filter_map(|s| s.result.clone().map(|r| (s.step_id.clone(), r)))
            .collect()
    }

    /// Variants the approver picked, keyed by step id.
    #[must_use]
    pub fn selected_variants(&self) -> BTreeMap<String, String> {
        self.steps
            .iter()
            .filter_map(|s| s.selected_variant.clone().map(|v| (s.step_id.clone(), v)))
            .collect()
    }

    /// Returns true if the run can no longer change without a reset.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Checks that `awaiting_approval` holds on the pipeline if and only if
    /// it holds on the step under the cursor.
    #[must_use]
    pub fn approval_invariant_holds(&self) -> bool {
        let step_waiting = self
            .current_step()
            .is_some_and(|s| s.status == StepStatus::AwaitingApproval);
        (self.status == PipelineStatus::AwaitingApproval) == step_waiting
    }
}

/// A human decision on a step awaiting approval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Accept the output and advance.
    pub approved: bool,
    /// Free text recorded on the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Variant label to carry forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_variant: Option<String>,
    /// Re-execute the step instead of advancing or stopping.
    #[serde(default)]
    pub regenerate: bool,
}

impl ApprovalDecision {
    /// Accepts the step output.
    #[must_use]
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }

    /// Accepts the step output and picks a variant.
    #[must_use]
    pub fn approve_variant(label: impl Into<String>) -> Self {
        Self {
            approved: true,
            selected_variant: Some(label.into()),
            ..Self::default()
        }
    }

    /// Rejects the step output, failing the run.
    #[must_use]
    pub fn reject() -> Self {
        Self::default()
    }

    /// Sends the step back for another attempt.
    #[must_use]
    pub fn regenerate() -> Self {
        Self {
            regenerate: true,
            ..Self::default()
        }
    }

    /// Attaches approver feedback.
    #[must_use]
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}
