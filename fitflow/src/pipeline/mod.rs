//! Pipeline orchestration.
//!
//! This module provides:
//! - The step catalog and per-run configuration
//! - Run state, inputs and approval decisions
//! - The step executor contract and registry
//! - The orchestrator state machine

mod config;
mod executor;
mod orchestrator;
mod state;
mod steps;

#[cfg(test)]
mod integration_tests;

pub use config::PipelineConfig;
pub use executor::{ExecutorRegistry, FnExecutor, StepExecutor, StepInvocation};
pub use orchestrator::PipelineOrchestrator;
pub use state::{
    ApprovalDecision, GarmentCategory, PipelineInputs, PipelineState, PipelineStepState,
};
pub use steps::{
    StepCatalog, StepDefinition, SEGMENTATION_STEP, VIDEO_GENERATION_STEP, VIRTUAL_TRYON_STEP,
};
