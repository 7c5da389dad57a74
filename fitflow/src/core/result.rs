//! Step result type produced by executors.

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One candidate image produced by a try-on step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryOnVariant {
    /// Label the approver picks by (e.g. "A", "B").
    pub label: String,
    /// Model that produced the variant.
    pub model: String,
    /// Location of the generated image.
    pub output_url: String,
}

impl TryOnVariant {
    /// Creates a new variant.
    #[must_use]
    pub fn new(label: impl Into<String>, model: impl Into<String>, output_url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model: model.into(),
            output_url: output_url.into(),
        }
    }
}

/// Typed payload of a successful step, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    /// Garment mask extracted from the garment image.
    Segmentation {
        /// Binary mask image.
        mask_url: String,
        /// Garment image with the background removed.
        segmented_garment_url: String,
    },
    /// Person wearing the garment, one entry per model variant.
    VirtualTryOn {
        /// Successful variants in the order they were requested.
        variants: Vec<TryOnVariant>,
    },
    /// Generated video clip.
    Video {
        /// Location of the clip.
        video_url: String,
        /// Clip length in seconds.
        duration_seconds: u32,
    },
    /// Payload of a custom stage.
    Custom(serde_json::Value),
}

impl StepOutput {
    /// Returns the URL a downstream step should consume by default.
    #[must_use]
    pub fn primary_url(&self) -> Option<&str> {
        match self {
            Self::Segmentation { segmented_garment_url, .. } => Some(segmented_garment_url),
            Self::VirtualTryOn { variants } => variants.first().map(|v| v.output_url.as_str()),
            Self::Video { video_url, .. } => Some(video_url),
            Self::Custom(_) => None,
        }
    }

    /// Looks up a try-on variant by label.
    #[must_use]
    pub fn variant(&self, label: &str) -> Option<&TryOnVariant> {
        match self {
            Self::VirtualTryOn { variants } => variants.iter().find(|v| v.label == label),
            _ => None,
        }
    }
}

/// The result of one executor attempt.
///
/// Produced exactly once per attempt and never mutated afterwards.
/// `error` is present if and only if `success` is false; use the
/// [`StepResult::success`] and [`StepResult::failure`] factories to keep
/// that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the attempt produced usable output.
    pub success: bool,

    /// Stage-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StepOutput>,

    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall time spent in the executor.
    pub processing_time_ms: u64,

    /// Identifier of the model that served the attempt.
    pub model_used: String,

    /// Resources the attempt consumed.
    #[serde(default)]
    pub input_urls: Vec<String>,

    /// Every artifact a later step or the caller may need.
    #[serde(default)]
    pub output_urls: Vec<String>,

    /// Open key-value annotations (per-variant errors, costs, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the result was produced.
    pub timestamp: Timestamp,
}

impl StepResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(model_used: impl Into<String>, data: StepOutput) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms: 0,
            model_used: model_used.into(),
            input_urls: Vec::new(),
            output_urls: Vec::new(),
            metadata: HashMap::new(),
            timestamp: now_utc(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(model_used: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time_ms: 0,
            model_used: model_used.into(),
            input_urls: Vec::new(),
            output_urls: Vec::new(),
            metadata: HashMap::new(),
            timestamp: now_utc(),
        }
    }

    /// Sets the processing time.
    #[must_use]
    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    /// Sets the input URLs.
    #[must_use]
    pub fn with_input_urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output URLs.
    #[must_use]
    pub fn with_output_urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Returns the first output URL, if any.
    #[must_use]
    pub fn primary_output_url(&self) -> Option<&str> {
        self.output_urls.first().map(String::as_str)
    }
}
