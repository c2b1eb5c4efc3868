//! Event sink trait and implementations.

use super::{EventKind, PipeEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Receiver of monitoring events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers an event.
    async fn emit(&self, event: PipeEvent);

    /// Delivers an event without waiting. Must never fail.
    fn try_emit(&self, event: PipeEvent);
}

/// Discards all events. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipeEvent) {}

    fn try_emit(&self, _event: PipeEvent) {}
}

/// Writes events to the tracing subscriber.
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
    /// Creates a sink logging at `level`. Warning-worthy kinds log at WARN regardless.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipeEvent) {
        let is_warning = matches!(
            event.kind,
            EventKind::PipeLongDuration | EventKind::PipeMessageSize | EventKind::PipelineFailed
        );
        if is_warning {
            warn!(
                event = %event.kind,
                pipeline = %event.pipeline,
                pipe = ?event.pipe,
                message_id = ?event.message_id,
                data = %event.data,
                "Event: {}", event.kind
            );
        } else if self.level == Level::DEBUG {
            debug!(
                event = %event.kind,
                pipeline = %event.pipeline,
                pipe = ?event.pipe,
                message_id = ?event.message_id,
                data = %event.data,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event = %event.kind,
                pipeline = %event.pipeline,
                pipe = ?event.pipe,
                message_id = ?event.message_id,
                data = %event.data,
                "Event: {}", event.kind
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipeEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipeEvent) {
        self.log_event(&event);
    }
}

/// Keeps events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipeEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<PipeEvent> {
        self.events.read().clone()
    }

    /// Events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<PipeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true when nothing arrived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipeEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipeEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(PipeEvent::new(EventKind::PipelineStarted, "p")).await;
        let sink = LoggingEventSink::debug();
        sink.emit(PipeEvent::new(EventKind::PipelineStarted, "p")).await;
        sink.try_emit(PipeEvent::new(EventKind::PipeLongDuration, "p").with_pipe("slow"));
    }

    #[tokio::test]
    async fn test_collecting_sink_filters_by_kind() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());
        sink.emit(PipeEvent::new(EventKind::PipelineStarted, "p")).await;
        sink.try_emit(PipeEvent::new(EventKind::PipeException, "p").with_pipe("a"));
        sink.emit(PipeEvent::new(EventKind::PipelineCompleted, "p")).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_kind(EventKind::PipeException).len(), 1);
        assert_eq!(sink.events()[2].kind, EventKind::PipelineCompleted);

        sink.clear();
        assert!(sink.is_empty());
    }
}
