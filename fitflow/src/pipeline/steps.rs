//! Step definitions and the ordered step catalog.

use super::PipelineConfig;
use crate::errors::FitflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Step id of garment segmentation.
pub const SEGMENTATION_STEP: &str = "segmentation";
/// Step id of the virtual try-on (garment fitting) synthesis.
pub const VIRTUAL_TRYON_STEP: &str = "virtual-tryon";
/// Step id of the video synthesis.
pub const VIDEO_GENERATION_STEP: &str = "video-generation";

/// Static description of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step key.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the step does.
    #[serde(default)]
    pub description: String,
    /// Whether a human must approve the output before the run advances.
    #[serde(default)]
    pub requires_approval: bool,
    /// Overrides `requires_approval` when set.
    #[serde(default)]
    pub auto_approve: bool,
    /// Whether the step may be re-executed after a failure.
    #[serde(default = "default_can_retry")]
    pub can_retry: bool,
    /// Upper bound on execution attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Rough duration, for progress displays.
    #[serde(default)]
    pub estimated_time_seconds: u32,
}

fn default_can_retry() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl StepDefinition {
    /// Creates a step that runs without approval and allows three attempts.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            requires_approval: false,
            auto_approve: false,
            can_retry: default_can_retry(),
            max_retries: default_max_retries(),
            estimated_time_seconds: 0,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Requires human approval after the step succeeds.
    #[must_use]
    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Sets the auto-approve override.
    #[must_use]
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retries(mut self, can_retry: bool, max_retries: u32) -> Self {
        self.can_retry = can_retry;
        self.max_retries = max_retries;
        self
    }

    /// Sets the time estimate.
    #[must_use]
    pub fn with_estimated_time(mut self, seconds: u32) -> Self {
        self.estimated_time_seconds = seconds;
        self
    }

    /// Returns true if the run must pause for a decision after this step.
    #[must_use]
    pub fn needs_approval(&self) -> bool {
        self.requires_approval && !self.auto_approve
    }

    /// Returns true if another attempt is allowed after `attempts` attempts.
    #[must_use]
    pub fn has_retry_budget(&self, attempts: u32) -> bool {
        self.can_retry && attempts < self.max_retries
    }
}

/// Ordered collection of step definitions; order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCatalog {
    steps: Vec<StepDefinition>,
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl StepCatalog {
    /// Creates a catalog.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if two steps share an id.
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, FitflowError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                return Err(FitflowError::Configuration("Step id cannot be empty".to_string()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FitflowError::Configuration(format!(
                    "Duplicate step id '{}' in catalog",
                    step.id
                )));
            }
        }
        Ok(Self { steps })
    }

    /// The segmentation → try-on → video catalog.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            steps: vec![
                StepDefinition::new(SEGMENTATION_STEP, "Garment Segmentation")
                    .with_description("Extract the garment from its background")
                    .requiring_approval()
                    .with_retries(true, 3)
                    .with_estimated_time(15),
                StepDefinition::new(VIRTUAL_TRYON_STEP, "Virtual Try-On")
                    .with_description("Fit the garment onto the person image")
                    .requiring_approval()
                    .with_retries(true, 3)
                    .with_estimated_time(45),
                StepDefinition::new(VIDEO_GENERATION_STEP, "Video Generation")
                    .with_description("Animate the approved try-on image")
                    .requiring_approval()
                    .with_retries(true, 2)
                    .with_estimated_time(180),
            ],
        }
    }

    /// Returns a step by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Returns every step in order.
    #[must_use]
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps enabled by `config`, in catalog order.
    #[must_use]
    pub fn active_steps(&self, config: &PipelineConfig) -> Vec<StepDefinition> {
        self.steps
            .iter()
            .filter(|s| config.is_step_enabled(&s.id))
            .cloned()
            .collect()
    }

    /// Sum of the estimates of the steps enabled by `config`.
    #[must_use]
    pub fn estimated_seconds(&self, config: &PipelineConfig) -> u32 {
        self.active_steps(config)
            .iter()
            .map(|s| s.estimated_time_seconds)
            .sum()
    }
}
