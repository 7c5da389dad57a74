//! Lifecycle event delivery.
//!
//! The orchestrator hands every [`PipelineEvent`](crate::core::PipelineEvent)
//! to the sinks registered on it. There is no global sink; each orchestrator
//! owns its listeners.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
