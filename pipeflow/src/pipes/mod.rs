//! Pipes: the processing units of a pipeline.
//!
//! A pipe receives a message and returns a [`PipeRunResult`] naming the
//! forward to follow. Everything around the call (locking, throttling,
//! transactions, caching, error redirection) is done by the processor chain,
//! so a pipe only implements its own transformation.

mod basic;
mod func;
mod json;
mod switch;

pub use basic::{EchoPipe, ExceptionPipe, FixedResultPipe, PutInSessionPipe};
pub use func::FnPipe;
pub use json::{JsonValidatorPipe, JsonWrapperPipe, WrapMode, FAILURE_FORWARD_NAME};
pub use switch::SwitchPipe;

use crate::core::{PipeForward, PipeRunResult, SUCCESS_FORWARD_NAME};
use crate::errors::{ErrorContext, PipeRunError};
use crate::message::Message;
use crate::pipeline::{Engine, PipeLine, PipeSpec};
use crate::session::Session;
use crate::statistics::PipeStatistics;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// A processing unit.
#[async_trait]
pub trait Pipe: Send + Sync + Debug {
    /// Processes one message.
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError>;

    /// Called when the owning pipeline starts.
    async fn start(&self) -> Result<(), PipeRunError> {
        Ok(())
    }

    /// Called when the owning pipeline stops.
    async fn stop(&self) {}
}

/// Everything a pipe (or a processor wrapping it) can see during one call.
#[derive(Clone, Copy)]
pub struct PipeContext<'a> {
    engine: &'a Engine,
    pipeline: &'a PipeLine,
    spec: &'a PipeSpec,
    session: &'a Session,
    message_id: &'a str,
}

impl<'a> PipeContext<'a> {
    /// Creates a context for one pipe call.
    #[must_use]
    pub const fn new(
        engine: &'a Engine,
        pipeline: &'a PipeLine,
        spec: &'a PipeSpec,
        session: &'a Session,
        message_id: &'a str,
    ) -> Self {
        Self {
            engine,
            pipeline,
            spec,
            session,
            message_id,
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

    /// Configuration of the pipe being called.
    #[must_use]
    pub const fn spec(&self) -> &'a PipeSpec {
        self.spec
    }

    /// The session of the current run.
    #[must_use]
    pub const fn session(&self) -> &'a Session {
        self.session
    }

    /// Id of the message being processed.
    #[must_use]
    pub const fn message_id(&self) -> &'a str {
        self.message_id
    }

    /// Name of the pipe being called.
    #[must_use]
    pub fn pipe_name(&self) -> &'a str {
        &self.spec.name
    }

    /// Returns true if the pipe declares a forward with this name.
    #[must_use]
    pub fn has_forward(&self, name: &str) -> bool {
        self.spec.forwards.contains_key(name)
    }

    /// Looks up a declared forward.
    pub fn forward(&self, name: &str) -> Result<PipeForward, PipeRunError> {
        self.spec.forwards.get(name).cloned().ok_or_else(|| {
            PipeRunError::pipe_failed(&self.spec.name, format!("cannot find forward [{name}]"))
        })
    }

    /// The `success` forward.
    pub fn success_forward(&self) -> Result<PipeForward, PipeRunError> {
        self.forward(SUCCESS_FORWARD_NAME)
    }

    /// Statistics collected for this pipe.
    #[must_use]
    pub fn statistics(&self) -> Arc<PipeStatistics> {
        self.pipeline.statistics().pipe(&self.spec.name)
    }

    /// Location info used when formatting an error of this pipe.
    #[must_use]
    pub fn error_context(&self) -> ErrorContext<'a> {
        ErrorContext {
            originator: &self.engine.config().originator,
            pipeline: self.pipeline.name(),
            pipe: Some(&self.spec.name),
            message_id: Some(self.message_id),
            received: self.session.ts_received(),
        }
    }
}

impl Debug for PipeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeContext")
            .field("pipeline", &self.pipeline.name())
            .field("pipe", &self.spec.name)
            .field("message_id", &self.message_id)
            .finish()
    }
}
