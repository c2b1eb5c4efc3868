//! Call context of one pipeline run.

use super::{Engine, PipeLine};
use crate::errors::ErrorContext;
use crate::session::Session;
use std::fmt;

/// What the pipeline-level processors and the dispatch loop see of a run.
#[derive(Clone, Copy)]
pub struct PipeLineContext<'a> {
    engine: &'a Engine,
    pipeline: &'a PipeLine,
    session: &'a Session,
    message_id: &'a str,
    first_pipe: &'a str,
}

impl<'a> PipeLineContext<'a> {
    /// Creates the context of one run.
    #[must_use]
    pub const fn new(
        engine: &'a Engine,
        pipeline: &'a PipeLine,
        session: &'a Session,
        message_id: &'a str,
        first_pipe: &'a str,
    ) -> Self {
        Self {
            engine,
            pipeline,
            session,
            message_id,
            first_pipe,
        }
    }

    /// The running engine.
    #[must_use]
    pub const fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// The pipeline being run.
    #[must_use]
    pub const fn pipeline(&self) -> &'a PipeLine {
        self.pipeline
    }

    /// Session of the run.
    #[must_use]
    pub const fn session(&self) -> &'a Session {
        self.session
    }

    /// Message id of the run.
    #[must_use]
    pub const fn message_id(&self) -> &'a str {
        self.message_id
    }

    /// Pipe the run starts at.
    #[must_use]
    pub const fn first_pipe(&self) -> &'a str {
        self.first_pipe
    }

    /// Location info for formatting an error of the run.
    #[must_use]
    pub fn error_context(&self) -> ErrorContext<'a> {
        ErrorContext {
            originator: &self.engine.config().originator,
            pipeline: self.pipeline.name(),
            pipe: None,
            message_id: Some(self.message_id),
            received: self.session.ts_received(),
        }
    }
}

impl fmt::Debug for PipeLineContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeLineContext")
            .field("pipeline", &self.pipeline.name())
            .field("message_id", &self.message_id)
            .field("first_pipe", &self.first_pipe)
            .finish()
    }
}
