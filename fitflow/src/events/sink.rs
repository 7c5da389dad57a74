//! Event sink trait and implementations.

use crate::core::{PipelineEvent, PipelineEventKind};
use crate::pipeline::PipelineState;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives orchestrator lifecycle events.
///
/// Sinks are invoked synchronously, in registration order, inline with the
/// state transition that produced the event. `state` is a snapshot taken
/// right after the transition. Sinks must not block for long; a panicking
/// sink is logged and skipped.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &PipelineEvent, state: &PipelineState);
}

impl<F> EventSink for F
where
    F: Fn(&PipelineEvent, &PipelineState) + Send + Sync,
{
    fn emit(&self, event: &PipelineEvent, state: &PipelineState) {
        self(event, state);
    }
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &PipelineEvent, _state: &PipelineState) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &PipelineEvent, state: &PipelineState) {
        let step_id = event.step_id.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.kind,
                session_id = %event.session_id,
                step_id,
                status = %state.status,
                progress = state.progress(),
                event_data = ?event.data,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                session_id = %event.session_id,
                step_id,
                status = %state.status,
                progress = state.progress(),
                event_data = ?event.data,
                "Event: {}", event.kind
            );
        }
    }
}

/// A collecting event sink for testing and inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(PipelineEvent, PipelineState)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().iter().map(|(e, _)| e.clone()).collect()
    }

    /// Returns the kinds of all collected events, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<PipelineEventKind> {
        self.events.read().iter().map(|(e, _)| e.kind).collect()
    }

    /// Returns the state snapshots delivered with each event.
    #[must_use]
    pub fn snapshots(&self) -> Vec<PipelineState> {
        self.events.read().iter().map(|(_, s)| s.clone()).collect()
    }

    /// Returns events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: PipelineEventKind) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|(e, _)| e.kind == kind)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &PipelineEvent, state: &PipelineState) {
        self.events.write().push((event.clone(), state.clone()));
    }
}
