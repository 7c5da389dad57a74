//! Deterministic executor used when `use_mock` is set.

use super::remote::{output_urls, ModelRequest};
use crate::core::{StepOutput, StepResult, TryOnVariant};
use crate::pipeline::{
    ExecutorRegistry, StepExecutor, StepInvocation, SEGMENTATION_STEP, VIDEO_GENERATION_STEP,
    VIRTUAL_TRYON_STEP,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Model id reported by mock results.
pub const MOCK_MODEL: &str = "mock";

/// Returns fake results without touching the network.
///
/// URLs are derived from the session, step and attempt, so the output is
/// identical for the same session, step and attempt.
#[derive(Debug, Clone, Default)]
pub struct MockStepExecutor {
    latency: Duration,
}

impl MockStepExecutor {
    /// Creates a mock executor with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn output(invocation: &StepInvocation) -> StepOutput {
        let base = format!(
            "mock://{}/{}/{}",
            invocation.session_id, invocation.step_id, invocation.attempt
        );
        match invocation.step_id.as_str() {
            SEGMENTATION_STEP => StepOutput::Segmentation {
                mask_url: format!("{base}/mask.png"),
                segmented_garment_url: format!("{base}/garment.png"),
            },
            VIRTUAL_TRYON_STEP => {
                let labels: &[&str] = if invocation.config.enable_ab_comparison {
                    &["A", "B"]
                } else {
                    &["A"]
                };
                StepOutput::VirtualTryOn {
                    variants: labels
                        .iter()
                        .map(|label| {
                            TryOnVariant::new(*label, MOCK_MODEL, format!("{base}/tryon-{label}.png"))
                        })
                        .collect(),
                }
            }
            VIDEO_GENERATION_STEP => StepOutput::Video {
                video_url: format!("{base}/video.mp4"),
                duration_seconds: invocation.config.video_duration,
            },
            _ => StepOutput::Custom(serde_json::json!({ "url": format!("{base}/output") })),
        }
    }
}

#[async_trait]
impl StepExecutor for MockStepExecutor {
    async fn execute(&self, invocation: StepInvocation) -> anyhow::Result<StepResult> {
        if !self.latency.is_zero()
            && invocation
                .cancellation
                .run_until_cancelled(tokio::time::sleep(self.latency))
                .await
                .is_none()
        {
            return Ok(StepResult::failure(MOCK_MODEL, "Operation cancelled"));
        }

        let request = match ModelRequest::from_invocation(&invocation) {
            Ok(request) => request,
            Err(message) => return Ok(StepResult::failure(MOCK_MODEL, message)),
        };
        let output = Self::output(&invocation);
        let urls = output_urls(&output);

        Ok(StepResult::success(MOCK_MODEL, output)
            .with_input_urls(request.source_urls)
            .with_output_urls(urls)
            .with_processing_time_ms(u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX))
            .with_metadata("mock", serde_json::json!(true)))
    }
}

/// A registry with the mock executor bound to every standard step.
#[must_use]
pub fn mock_registry() -> ExecutorRegistry {
    let mock: Arc<dyn StepExecutor> = Arc::new(MockStepExecutor::new());
    ExecutorRegistry::new()
        .with(SEGMENTATION_STEP, Arc::clone(&mock))
        .with(VIRTUAL_TRYON_STEP, Arc::clone(&mock))
        .with(VIDEO_GENERATION_STEP, mock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineStatus;
    use crate::pipeline::{ApprovalDecision, PipelineConfig, PipelineOrchestrator};
    use crate::testing::sample_inputs;

    #[tokio::test]
    async fn test_mock_run_is_deterministic() {
        let orch = PipelineOrchestrator::new(
            mock_registry(),
            PipelineConfig::new().with_mock(true).with_ab_comparison(true),
        );

        orch.start(sample_inputs()).await.unwrap();
        orch.approve(ApprovalDecision::approve()).await.unwrap();
        let state = orch.state();
        let tryon = state.step(VIRTUAL_TRYON_STEP).unwrap().result.as_ref().unwrap();
        assert_eq!(tryon.output_urls.len(), 2);
        assert_eq!(
            tryon.input_urls[1],
            format!("mock://{}/segmentation/1/garment.png", state.session_id)
        );

        orch.approve(ApprovalDecision::approve_variant("B")).await.unwrap();
        let state = orch.approve(ApprovalDecision::approve()).await.unwrap();

        assert_eq!(state.status, PipelineStatus::Completed);
        let video = state.step(VIDEO_GENERATION_STEP).unwrap().result.as_ref().unwrap();
        assert_eq!(video.input_urls, vec![format!("mock://{}/virtual-tryon/1/tryon-B.png", state.session_id)]);
        assert_eq!(
            video.data,
            Some(StepOutput::Video {
                video_url: format!("mock://{}/video-generation/1/video.mp4", state.session_id),
                duration_seconds: 5,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_latency() {
        let orch = PipelineOrchestrator::new(
            ExecutorRegistry::new()
                .with(VIRTUAL_TRYON_STEP, Arc::new(MockStepExecutor::new().with_latency(Duration::from_secs(2)))),
            PipelineConfig::new().with_segmentation(false).with_video(false),
        );

        let started = tokio::time::Instant::now();
        let state = orch.start(sample_inputs()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(state.status, PipelineStatus::AwaitingApproval);
        assert_eq!(state.steps[0].result.as_ref().unwrap().processing_time_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_latency_ends_on_cancel() {
        let invocation = crate::testing::invocation_for(SEGMENTATION_STEP);
        invocation.cancellation.cancel("user left");

        let result = MockStepExecutor::new()
            .with_latency(Duration::from_secs(30))
            .execute(invocation)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("Operation cancelled"));
    }

    #[tokio::test]
    async fn test_output_is_keyed_by_session_step_and_attempt() {
        let executor = MockStepExecutor::new();
        let first = executor.execute(crate::testing::invocation_for(SEGMENTATION_STEP)).await.unwrap();
        let again = executor.execute(crate::testing::invocation_for(SEGMENTATION_STEP)).await.unwrap();
        assert_eq!(first.data, again.data);

        let mut other_session = crate::testing::invocation_for(SEGMENTATION_STEP);
        other_session.session_id = "session-other".to_string();
        let other = executor.execute(other_session).await.unwrap();
        assert_ne!(first.data, other.data);
    }
}
