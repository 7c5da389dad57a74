//! Boundary to the remote model integrations.
//!
//! A [`RemoteModel`] is one hosted model (segmentation, try-on or video).
//! Adapters translate a [`ModelRequest`] into the provider's wire format
//! and back; they live outside this crate.

use crate::core::{StepOutput, StepResult};
use crate::errors::RemoteError;
use crate::pipeline::{
    GarmentCategory, StepInvocation, SEGMENTATION_STEP, VIDEO_GENERATION_STEP,
    VIRTUAL_TRYON_STEP,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

/// Provider-neutral request for one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Step the call serves.
    pub step_id: String,
    /// Garment category from the run inputs.
    pub category: GarmentCategory,
    /// Resources the model consumes, in the order the model expects them.
    pub source_urls: Vec<String>,
    /// Pose keypoints, when the caller supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_data: Option<serde_json::Value>,
    /// Model parameters merged from the inputs and the step.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl ModelRequest {
    /// Builds the request for an attempt from the run inputs and prior results.
    ///
    /// - segmentation consumes the garment image
    /// - try-on consumes the person image and the segmented garment, falling
    ///   back to the raw garment image when segmentation did not run
    /// - video consumes the selected try-on variant, or the first one
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when a required upstream result is
    /// missing.
    pub fn from_invocation(invocation: &StepInvocation) -> Result<Self, String> {
        let inputs = &invocation.inputs;
        let mut parameters = inputs.parameters.clone();

        let source_urls = match invocation.step_id.as_str() {
            SEGMENTATION_STEP => vec![inputs.garment_image_url.clone()],
            VIRTUAL_TRYON_STEP => {
                let garment = invocation
                    .prior(SEGMENTATION_STEP)
                    .and_then(|r| r.data.as_ref())
                    .and_then(StepOutput::primary_url)
                    .unwrap_or(inputs.garment_image_url.as_str());
                vec![inputs.person_image_url.clone(), garment.to_string()]
            }
            VIDEO_GENERATION_STEP => {
                let source = tryon_source(invocation).ok_or_else(|| {
                    "video generation requires a completed virtual try-on result".to_string()
                })?;
                parameters.insert(
                    "duration_seconds".to_string(),
                    serde_json::json!(invocation.config.video_duration),
                );
                vec![source]
            }
            _ => vec![
                inputs.person_image_url.clone(),
                inputs.garment_image_url.clone(),
            ],
        };

        Ok(Self {
            step_id: invocation.step_id.clone(),
            category: inputs.category,
            source_urls,
            pose_data: inputs.pose_data.clone(),
            parameters,
        })
    }
}

fn tryon_source(invocation: &StepInvocation) -> Option<String> {
    let output = invocation.prior(VIRTUAL_TRYON_STEP)?.data.as_ref()?;
    let selected = invocation
        .selected_variant(VIRTUAL_TRYON_STEP)
        .and_then(|label| output.variant(label))
        .map(|v| v.output_url.as_str());
    selected.or_else(|| output.primary_url()).map(ToString::to_string)
}

/// A successful model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Identifier of the model that served the call.
    pub model: String,
    /// Typed output of the call.
    pub output: StepOutput,
    /// Every resource the call produced.
    pub output_urls: Vec<String>,
    /// Provider-specific details copied into the step result.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ModelResponse {
    /// Creates a response; output URLs are derived from the output.
    #[must_use]
    pub fn new(model: impl Into<String>, output: StepOutput) -> Self {
        let output_urls = output_urls(&output);
        Self {
            model: model.into(),
            output,
            output_urls,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Converts into a successful step result.
    #[must_use]
    pub fn into_step_result(self, request: &ModelRequest) -> StepResult {
        let mut result = StepResult::success(self.model, self.output)
            .with_input_urls(request.source_urls.clone())
            .with_output_urls(self.output_urls);
        result.metadata.extend(self.metadata);
        result
    }
}

/// Every artifact URL carried by an output.
#[must_use]
pub fn output_urls(output: &StepOutput) -> Vec<String> {
    match output {
        StepOutput::Segmentation {
            mask_url,
            segmented_garment_url,
        } => vec![segmented_garment_url.clone(), mask_url.clone()],
        StepOutput::VirtualTryOn { variants } => {
            variants.iter().map(|v| v.output_url.clone()).collect()
        }
        StepOutput::Video { video_url, .. } => vec![video_url.clone()],
        StepOutput::Custom(_) => Vec::new(),
    }
}

/// A hosted model reachable over the network.
#[async_trait]
pub trait RemoteModel: Send + Sync + Debug {
    /// Stable identifier of the model (e.g. `"fashn-v1.5"`).
    fn model_id(&self) -> &str;

    /// Performs one call. Must be safe to repeat.
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, RemoteError>;
}
