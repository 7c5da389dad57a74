//! Caller-supplied pipeline configuration.

use super::steps::{SEGMENTATION_STEP, VIDEO_GENERATION_STEP};
use crate::errors::FitflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const ENV_PREFIX: &str = "FITFLOW_";

/// Options recognised by the orchestrator and its executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run the segmentation stage.
    #[serde(default = "default_true")]
    pub enable_segmentation: bool,
    /// Run dual-variant steps where supported.
    #[serde(default)]
    pub enable_ab_comparison: bool,
    /// Run the video stage.
    #[serde(default = "default_true")]
    pub enable_video: bool,
    /// Requested clip length in seconds.
    #[serde(default = "default_video_duration")]
    pub video_duration: u32,
    /// Executors return deterministic fake results without remote calls.
    #[serde(default)]
    pub use_mock: bool,
    /// Where the host persists artifacts; unused by the orchestrator.
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    /// Additional step ids to leave out of the run.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub disabled_steps: HashSet<String>,
}

fn default_true() -> bool {
    true
}

fn default_video_duration() -> u32 {
    5
}

fn default_output_directory() -> String {
    "output".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_segmentation: true,
            enable_ab_comparison: false,
            enable_video: true,
            video_duration: default_video_duration(),
            use_mock: false,
            output_directory: default_output_directory(),
            disabled_steps: HashSet::new(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables segmentation.
    #[must_use]
    pub fn with_segmentation(mut self, enabled: bool) -> Self {
        self.enable_segmentation = enabled;
        self
    }

    /// Enables or disables A/B variant comparison.
    #[must_use]
    pub fn with_ab_comparison(mut self, enabled: bool) -> Self {
        self.enable_ab_comparison = enabled;
        self
    }

    /// Enables or disables video generation.
    #[must_use]
    pub fn with_video(mut self, enabled: bool) -> Self {
        self.enable_video = enabled;
        self
    }

    /// Sets the video duration.
    #[must_use]
    pub fn with_video_duration(mut self, seconds: u32) -> Self {
        self.video_duration = seconds;
        self
    }

    /// Enables or disables mock execution.
    #[must_use]
    pub fn with_mock(mut self, enabled: bool) -> Self {
        self.use_mock = enabled;
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_directory(mut self, dir: impl Into<String>) -> Self {
        self.output_directory = dir.into();
        self
    }

    /// Leaves an arbitrary step out of the run.
    #[must_use]
    pub fn without_step(mut self, step_id: impl Into<String>) -> Self {
        self.disabled_steps.insert(step_id.into());
        self
    }

    /// Returns true if `step_id` takes part in the run.
    #[must_use]
    pub fn is_step_enabled(&self, step_id: &str) -> bool {
        if self.disabled_steps.contains(step_id) {
            return false;
        }
        match step_id {
            SEGMENTATION_STEP => self.enable_segmentation,
            VIDEO_GENERATION_STEP => self.enable_video,
            _ => true,
        }
    }

    /// Parses a configuration from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, FitflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads `FITFLOW_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, FitflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Keys are `FITFLOW_ENABLE_SEGMENTATION`, `FITFLOW_ENABLE_AB_COMPARISON`,
    /// `FITFLOW_ENABLE_VIDEO`, `FITFLOW_VIDEO_DURATION`, `FITFLOW_USE_MOCK`,
    /// `FITFLOW_OUTPUT_DIRECTORY` and `FITFLOW_DISABLED_STEPS`
    /// (comma separated).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FitflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(v) = get("ENABLE_SEGMENTATION") {
            config.enable_segmentation = parse_bool("ENABLE_SEGMENTATION", &v)?;
        }
        if let Some(v) = get("ENABLE_AB_COMPARISON") {
            config.enable_ab_comparison = parse_bool("ENABLE_AB_COMPARISON", &v)?;
        }
        if let Some(v) = get("ENABLE_VIDEO") {
            config.enable_video = parse_bool("ENABLE_VIDEO", &v)?;
        }
        if let Some(v) = get("VIDEO_DURATION") {
            config.video_duration = v.trim().parse().map_err(|_| {
                FitflowError::Configuration(format!(
                    "{ENV_PREFIX}VIDEO_DURATION must be a whole number of seconds, got '{v}'"
                ))
            })?;
        }
        if let Some(v) = get("USE_MOCK") {
            config.use_mock = parse_bool("USE_MOCK", &v)?;
        }
        if let Some(v) = get("OUTPUT_DIRECTORY") {
            config.output_directory = v;
        }
        if let Some(v) = get("DISABLED_STEPS") {
            config.disabled_steps = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, FitflowError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(FitflowError::Configuration(format!(
            "{ENV_PREFIX}{name} must be a boolean, got '{other}'"
        ))),
    }
}
