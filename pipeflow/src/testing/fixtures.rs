//! Pipeline fixtures for tests.

use crate::core::{PipeLineExit, PipeLineResult};
use crate::errors::{ConfigurationError, PipeRunError};
use crate::message::Message;
use crate::pipeline::{Engine, PipeLine, PipeLineBuilder, PipeSpec};
use crate::pipes::Pipe;
use crate::session::Session;
use crate::utils::generate_message_id;
use std::sync::Arc;

/// Name of the pipe in single-pipe fixtures.
pub const HARNESS_PIPE_NAME: &str = "pipe";

/// A built and registered pipeline together with its engine.
#[derive(Debug, Clone)]
pub struct PipeHarness {
    engine: Arc<Engine>,
    pipeline: Arc<PipeLine>,
}

impl PipeHarness {
    /// Builds the pipeline on a default engine.
    pub fn new(builder: PipeLineBuilder) -> Result<Self, ConfigurationError> {
        Self::with_engine(Engine::new(), builder)
    }

    /// Builds the pipeline and registers it with `engine`.
    pub fn with_engine(engine: Engine, builder: PipeLineBuilder) -> Result<Self, ConfigurationError> {
        let pipeline = builder.build(engine.warnings())?;
        let pipeline = engine.register(pipeline);
        Ok(Self {
            engine: Arc::new(engine),
            pipeline,
        })
    }

    /// A pipeline named `test` holding one pipe named `pipe`, with a
    /// SUCCESS exit `READY` and an ERROR exit `ERROR`.
    pub fn single(pipe: impl Pipe + 'static) -> Result<Self, ConfigurationError> {
        Self::for_spec(PipeSpec::new(HARNESS_PIPE_NAME, Arc::new(pipe)))
    }

    /// Like [`single`](Self::single) for a prepared spec.
    pub fn for_spec(spec: PipeSpec) -> Result<Self, ConfigurationError> {
        let builder = PipeLineBuilder::new("test")
            .pipe(spec)?
            .exit(PipeLineExit::success("READY"))?
            .exit(PipeLineExit::error("ERROR").with_exit_code(1))?;
        Self::new(builder)
    }

    /// The engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The registered pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<PipeLine> {
        &self.pipeline
    }

    /// Runs a message in a fresh session and closes the session afterwards.
    pub async fn run(&self, message: impl Into<Message>) -> Result<PipeLineResult, PipeRunError> {
        let session = Session::new();
        let result = self.run_in(&session, message).await;
        session.close();
        result
    }

    /// Runs a message in the caller's session.
    pub async fn run_in(&self, session: &Session, message: impl Into<Message>) -> Result<PipeLineResult, PipeRunError> {
        let message_id = session.message_id().unwrap_or_else(generate_message_id);
        self.engine
            .run(&self.pipeline, &message_id, message.into(), session, None)
            .await
    }
}
