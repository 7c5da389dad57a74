//! Test fixtures for pipeline testing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::core::{StepOutput, StepResult, TryOnVariant};
use crate::pipeline::{
    GarmentCategory, PipelineConfig, PipelineInputs, StepCatalog, StepDefinition, StepInvocation,
    SEGMENTATION_STEP, VIDEO_GENERATION_STEP, VIRTUAL_TRYON_STEP,
};

/// A person/garment pair used across tests.
#[must_use]
pub fn sample_inputs() -> PipelineInputs {
    PipelineInputs::new(
        GarmentCategory::UpperBody,
        "https://cdn.example.com/person.jpg",
        "https://cdn.example.com/shirt.jpg",
    )
}

/// The standard step ids, none gated and each allowed `max_retries` attempts.
#[must_use]
pub fn test_catalog(max_retries: u32) -> StepCatalog {
    let steps = [SEGMENTATION_STEP, VIRTUAL_TRYON_STEP, VIDEO_GENERATION_STEP]
        .into_iter()
        .map(|id| StepDefinition::new(id, id).with_retries(true, max_retries))
        .collect();
    StepCatalog::new(steps).unwrap_or_default()
}

/// The standard step ids, every one gated by approval.
#[must_use]
pub fn gated_catalog(max_retries: u32) -> StepCatalog {
    let steps = test_catalog(max_retries)
        .steps()
        .iter()
        .cloned()
        .map(StepDefinition::requiring_approval)
        .collect();
    StepCatalog::new(steps).unwrap_or_default()
}

/// A successful result shaped like the given step's real output.
#[must_use]
pub fn success_result(step_id: &str) -> StepResult {
    let output = match step_id {
        SEGMENTATION_STEP => StepOutput::Segmentation {
            mask_url: "mem://mask.png".to_string(),
            segmented_garment_url: "mem://garment.png".to_string(),
        },
        VIRTUAL_TRYON_STEP => StepOutput::VirtualTryOn {
            variants: vec![
                TryOnVariant::new("A", "fashn", "mem://tryon-a.png"),
                TryOnVariant::new("B", "kolors", "mem://tryon-b.png"),
            ],
        },
        VIDEO_GENERATION_STEP => StepOutput::Video {
            video_url: "mem://clip.mp4".to_string(),
            duration_seconds: 5,
        },
        other => StepOutput::Custom(serde_json::json!({ "step": other })),
    };
    let urls = crate::executors::output_urls(&output);
    StepResult::success("scripted", output).with_output_urls(urls)
}

/// A standalone invocation of `step_id` with sample inputs.
#[must_use]
pub fn invocation_for(step_id: &str) -> StepInvocation {
    StepInvocation {
        step_id: step_id.to_string(),
        session_id: "session-test".to_string(),
        attempt: 1,
        inputs: sample_inputs(),
        prior_results: BTreeMap::new(),
        selected_variants: BTreeMap::new(),
        config: PipelineConfig::default(),
        model_hint: None,
        cancellation: Arc::new(CancellationToken::new()),
    }
}
