//! Core domain model types for fitflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Step and pipeline status enums
//! - Step results with typed per-stage outputs
//! - Pipeline lifecycle events

mod event;
mod result;
mod status;

pub use event::{PipelineEvent, PipelineEventKind};
pub use result::{StepOutput, StepResult, TryOnVariant};
pub use status::{PipelineStatus, StepStatus};
