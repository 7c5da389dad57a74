//! Step and pipeline status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a single step within a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not started yet.
    #[default]
    Pending,
    /// Step executor is in flight.
    Running,
    /// Step succeeded and is waiting for a human decision.
    AwaitingApproval,
    /// Step output was approved.
    Approved,
    /// Step output was rejected.
    Rejected,
    /// Step finished and the pipeline moved past it.
    Completed,
    /// Step failed.
    Failed,
    /// Step was excluded from the run.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StepStatus {
    /// Returns true if the step's output may be consumed by later steps.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Approved)
    }

    /// Returns true if the step ended without usable output.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Rejected)
    }
}

/// The status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// No run has been started.
    #[default]
    Idle,
    /// The step loop is executing.
    Running,
    /// Suspended until a human decision arrives.
    AwaitingApproval,
    /// Every active step completed.
    Completed,
    /// A step failed terminally or was rejected.
    Failed,
    /// The caller cancelled the run.
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if the run can no longer change without a reset.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if a run is in progress (executing or suspended).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingApproval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_display() {
        assert_eq!(StepStatus::Pending.to_string(), "pending");
        assert_eq!(StepStatus::AwaitingApproval.to_string(), "awaiting_approval");
        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_pipeline_status_terminal() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Failed.is_terminal());
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Idle.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(!PipelineStatus::AwaitingApproval.is_terminal());
    }

    #[test]
    fn test_pipeline_status_active() {
        assert!(PipelineStatus::Running.is_active());
        assert!(PipelineStatus::AwaitingApproval.is_active());
        assert!(!PipelineStatus::Idle.is_active());
        assert!(!PipelineStatus::Cancelled.is_active());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StepStatus::AwaitingApproval).unwrap();
        assert_eq!(json, r#""awaiting_approval""#);

        let status: PipelineStatus = serde_json::from_str(r#""cancelled""#).unwrap();
        assert_eq!(status, PipelineStatus::Cancelled);
    }
}
