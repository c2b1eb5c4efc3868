//! Monitoring events.
//!
//! The engine reports noteworthy moments of a run (slow pipes, oversized
//! messages, skipped runs) as [`PipeEvent`]s to the [`EventSink`] it was
//! built with.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A pipeline run started.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A pipeline run reached an exit.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// A pipeline run ended with a run error.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
    /// A pipeline run was skipped because its lock was busy.
    #[serde(rename = "pipeline.lock_skipped")]
    PipelineLockSkipped,
    /// A cached result was returned.
    #[serde(rename = "pipeline.cache_hit")]
    CacheHit,
    /// A pipe ran longer than its duration threshold.
    #[serde(rename = "pipe.long_duration")]
    PipeLongDuration,
    /// A pipe failed and recovered through its exception forward.
    #[serde(rename = "pipe.exception")]
    PipeException,
    /// A message exceeded the size warning threshold.
    #[serde(rename = "pipe.message_size")]
    PipeMessageSize,
    /// A sub-pipeline call started.
    #[serde(rename = "subpipeline.started")]
    SubPipelineStarted,
    /// A sub-pipeline call completed.
    #[serde(rename = "subpipeline.completed")]
    SubPipelineCompleted,
}

impl EventKind {
    /// Dotted event name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
            Self::PipelineLockSkipped => "pipeline.lock_skipped",
            Self::CacheHit => "pipeline.cache_hit",
            Self::PipeLongDuration => "pipe.long_duration",
            Self::PipeException => "pipe.exception",
            Self::PipeMessageSize => "pipe.message_size",
            Self::SubPipelineStarted => "subpipeline.started",
            Self::SubPipelineCompleted => "subpipeline.completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitoring event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Pipeline the event belongs to.
    pub pipeline: String,
    /// Pipe the event belongs to, if any.
    pub pipe: Option<String>,
    /// Message being processed.
    pub message_id: Option<String>,
    /// Kind-specific details.
    pub data: serde_json::Value,
    /// When it happened.
    pub timestamp: Timestamp,
}

impl PipeEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(kind: EventKind, pipeline: impl Into<String>) -> Self {
        Self {
            kind,
            pipeline: pipeline.into(),
            pipe: None,
            message_id: None,
            data: serde_json::Value::Null,
            timestamp: now_utc(),
        }
    }

    /// Sets the pipe.
    #[must_use]
    pub fn with_pipe(mut self, pipe: impl Into<String>) -> Self {
        self.pipe = Some(pipe.into());
        self
    }

    /// Sets the message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    /// Sets the details.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
