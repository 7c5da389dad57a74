//! # Fitflow
//!
//! A human-gated orchestration engine for multi-stage virtual try-on
//! pipelines: garment segmentation, try-on synthesis and video generation,
//! separated by approval checkpoints.
//!
//! Fitflow provides:
//!
//! - **Step sequencing**: a state machine that walks the enabled steps in order
//! - **Approval gates**: true suspension points resumed by `approve`/`retry`
//! - **Resilience**: circuit breakers and exponential-backoff retry around every model call
//! - **Cooperative cancellation**: a per-run token threaded into executors
//! - **Lifecycle events**: synchronous delivery of state snapshots to listeners
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fitflow::prelude::*;
//!
//! # async fn run() -> Result<(), FitflowError> {
//! let config = PipelineConfig::from_env()?;
//! let orchestrator = PipelineOrchestrator::new(mock_registry(), config.with_mock(true));
//! orchestrator.subscribe(std::sync::Arc::new(LoggingEventSink::info()));
//!
//! let inputs = PipelineInputs::new(
//!     GarmentCategory::UpperBody,
//!     "https://cdn.example.com/person.jpg",
//!     "https://cdn.example.com/shirt.jpg",
//! );
//! let state = orchestrator.start(inputs).await?;
//! if state.status == PipelineStatus::AwaitingApproval {
//!     orchestrator.approve(ApprovalDecision::approve()).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod executors;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        PipelineEvent, PipelineEventKind, PipelineStatus, StepOutput, StepResult, StepStatus,
        TryOnVariant,
    };
    pub use crate::errors::{CircuitOpenError, FitflowError, RemoteError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executors::{
        mock_registry, model_registry, MockStepExecutor, ModelBinding, ModelRequest,
        ModelResponse, ModelSet, ModelStepExecutor, RemoteModel,
    };
    pub use crate::observability::{init_tracing, LogFormat, StepLogSink};
    pub use crate::pipeline::{
        ApprovalDecision, ExecutorRegistry, GarmentCategory, PipelineConfig, PipelineInputs,
        PipelineOrchestrator, PipelineState, PipelineStepState, StepCatalog, StepDefinition,
        StepExecutor, StepInvocation,
    };
    pub use crate::resilience::{
        with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
        RetryConfig, RetryPolicy,
    };
    pub use crate::utils::{generate_session_id, iso_timestamp, Timestamp};
}
