//! Observability utilities.
//!
//! - [`init_tracing`]: global `tracing` subscriber setup
//! - [`StepLogSink`]: one structured log record per completed step
//! - [`ArtifactStore`]: the host's artifact persistence boundary

mod step_log;
mod subscriber;

pub use step_log::{persist_completed_outputs, ArtifactStore, StepLogRecord, StepLogSink};
pub use subscriber::{init_tracing, LogFormat};
