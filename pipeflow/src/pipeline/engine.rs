//! The engine: registry of pipelines and entry point of every run.

use super::context::PipeLineContext;
use super::graph::PipeLine;
use super::spec::PipeSpec;
use crate::config::{ConfigurationWarnings, EngineConfig};
use crate::core::{ExitState, PipeLineResult, PipeRunResult};
use crate::errors::{
    ConfigurationError, ErrorContext, ErrorMessageFormatter, JsonErrorMessageFormatter, PipeRunError,
};
use crate::events::{EventSink, LoggingEventSink};
use crate::message::Message;
use crate::pipes::PipeContext;
use crate::processors::{
    default_pipe_chain, default_pipeline_chain, PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor,
};
use crate::session::{Session, MESSAGE_ID_KEY, ORIGINAL_MESSAGE_KEY, TS_RECEIVED_KEY};
use crate::transaction::{InMemoryTransactionManager, TransactionManager};
use crate::utils::now_utc;
use dashmap::DashMap;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Longest message preview written to the log.
const LOG_PREVIEW_CHARS: usize = 1000;

/// Runs pipelines.
///
/// Holds the processor chains, the collaborators the chain steps use and the
/// registry of named pipelines that sub-pipeline calls and
/// [`process_message`](Self::process_message) look up.
pub struct Engine {
    config: EngineConfig,
    pipe_processors: Vec<Arc<dyn PipeProcessor>>,
    pipeline_processors: Vec<Arc<dyn PipeLineProcessor>>,
    pipelines: DashMap<String, Arc<PipeLine>>,
    events: Arc<dyn EventSink>,
    formatter: Arc<dyn ErrorMessageFormatter>,
    transaction_manager: Arc<dyn TransactionManager>,
    warnings: ConfigurationWarnings,
}

impl Engine {
    /// Creates an engine with default collaborators and chains.
    #[must_use]
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sink receiving monitoring events.
    #[must_use]
    pub fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// Formatter for error messages sent down `exception` forwards.
    #[must_use]
    pub fn formatter(&self) -> &dyn ErrorMessageFormatter {
        self.formatter.as_ref()
    }

    /// Transaction manager used by the transaction steps.
    #[must_use]
    pub fn transaction_manager(&self) -> &Arc<dyn TransactionManager> {
        &self.transaction_manager
    }

    /// Warnings collected while registering pipelines; pass it to
    /// [`PipeLineBuilder::build`](super::PipeLineBuilder::build) as well.
    #[must_use]
    pub const fn warnings(&self) -> &ConfigurationWarnings {
        &self.warnings
    }

    /// Registers a pipeline under its name, replacing any previous one.
    pub fn register(&self, pipeline: PipeLine) -> Arc<PipeLine> {
        if let Some(pre) = pipeline.run_before_on_empty_input() {
            if pre != pipeline.name() && !self.pipelines.contains_key(pre) {
                self.warnings.add(
                    format!("pipeline [{}]", pipeline.name()),
                    format!("pre-processing pipeline [{pre}] is not registered"),
                );
            }
        }
        let pipeline = Arc::new(pipeline);
        if self
            .pipelines
            .insert(pipeline.name().to_string(), pipeline.clone())
            .is_some()
        {
            warn!(pipeline = %pipeline.name(), "Replaced an already registered pipeline");
        }
        info!(pipeline = %pipeline.name(), "Registered pipeline");
        pipeline
    }

    /// Looks up a registered pipeline.
    #[must_use]
    pub fn pipeline(&self, name: &str) -> Option<Arc<PipeLine>> {
        self.pipelines.get(name).map(|p| p.value().clone())
    }

    /// Names of all registered pipelines, sorted.
    #[must_use]
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.iter().map(|p| p.key().clone()).collect();
        names.sort();
        names
    }

    /// Starts every registered pipeline.
    pub async fn start(&self) -> Result<(), PipeRunError> {
        for pipeline in self.snapshot() {
            pipeline.start().await?;
        }
        Ok(())
    }

    /// Stops every registered pipeline.
    pub async fn stop(&self) {
        for pipeline in self.snapshot() {
            pipeline.stop().await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<PipeLine>> {
        let mut pipelines: Vec<Arc<PipeLine>> = self.pipelines.iter().map(|p| p.value().clone()).collect();
        pipelines.sort_by(|a, b| a.name().cmp(b.name()));
        pipelines
    }

    /// Runs a message through a pipeline.
    ///
    /// Completes when the run has reached an exit or failed. Exit handlers
    /// run in both cases; their failures are logged and never change the
    /// outcome.
    pub async fn run(
        &self,
        pipeline: &PipeLine,
        message_id: &str,
        message: Message,
        session: &Session,
        first_pipe: Option<&str>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let result = self
            .run_to_exit(pipeline, message_id, message, session, first_pipe)
            .await;
        run_exit_handlers(pipeline, message_id, result.as_ref().ok(), session).await;
        result
    }

    /// [`run`](Self::run) without the exit handlers; the caller runs them.
    pub(crate) async fn run_to_exit(
        &self,
        pipeline: &PipeLine,
        message_id: &str,
        message: Message,
        session: &Session,
        first_pipe: Option<&str>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let mut message = message;
        if message.is_empty() {
            if let Some(text) = pipeline.transform_null_message() {
                debug!(pipeline = %pipeline.name(), "Replacing empty input with configured message");
                message = Message::text(text);
            }
        }
        session.put_if_absent(MESSAGE_ID_KEY, message_id);
        if pipeline.reads_session_key(ORIGINAL_MESSAGE_KEY) {
            message.preserve()?;
        }
        if !session.contains_key(ORIGINAL_MESSAGE_KEY) {
            session.put(ORIGINAL_MESSAGE_KEY, message.clone());
        }

        let first = first_pipe.unwrap_or_else(|| pipeline.first_pipe());
        let ctx = PipeLineContext::new(self, pipeline, session, message_id, first);
        let result = PipeLineNext::new(&self.pipeline_processors)
            .proceed(&ctx, message)
            .await;
        if let Ok(outcome) = &result {
            // the result outlives the session
            session.unschedule(&outcome.result);
        }
        result
    }

    /// Runs one pipe of a pipeline through the pipe processor chain.
    pub async fn run_pipe(
        &self,
        pipeline: &PipeLine,
        spec: &PipeSpec,
        message: Message,
        session: &Session,
        message_id: &str,
    ) -> Result<PipeRunResult, PipeRunError> {
        let ctx = PipeContext::new(self, pipeline, spec, session, message_id);
        PipeNext::new(&self.pipe_processors).proceed(&ctx, message).await
    }

    /// Runs a registered pipeline the way a receiver does: with the
    /// pipeline's hide patterns active and the outcome logged.
    pub async fn process_message(
        &self,
        pipeline_name: &str,
        message_id: &str,
        message: Message,
        session: &Session,
    ) -> Result<PipeLineResult, PipeRunError> {
        let pipeline = self.pipeline(pipeline_name).ok_or_else(|| {
            PipeRunError::Configuration(ConfigurationError::new(format!(
                "No pipeline registered under name [{pipeline_name}]"
            )))
        })?;
        let _hidden = session.hide_scope(&pipeline.hide_patterns());
        session.put_if_absent(TS_RECEIVED_KEY, now_utc());

        info!(pipeline = %pipeline_name, message_id = %message_id, "Processing message");
        debug!(pipeline = %pipeline_name, message_id = %message_id, input = %log_preview(&message, session), "Message input");

        let result = self.run(&pipeline, message_id, message, session, None).await;
        match &result {
            Ok(outcome) => info!(
                pipeline = %pipeline_name,
                message_id = %message_id,
                state = %outcome.state,
                exit_code = outcome.exit_code,
                "Pipeline finished"
            ),
            Err(err) => warn!(
                pipeline = %pipeline_name,
                message_id = %message_id,
                error = %session.mask(&err.to_string()),
                "Pipeline failed"
            ),
        }
        result
    }

    /// Like [`process_message`](Self::process_message) but never fails: a run
    /// error becomes an ERROR result carrying the formatted error message.
    pub async fn process_message_direct(
        &self,
        pipeline_name: &str,
        message_id: &str,
        message: Message,
        session: &Session,
    ) -> PipeLineResult {
        let original = message.clone();
        match self.process_message(pipeline_name, message_id, message, session).await {
            Ok(result) => result,
            Err(err) => {
                let context = ErrorContext {
                    originator: &self.config.originator,
                    pipeline: pipeline_name,
                    pipe: err.pipe_in_error(),
                    message_id: Some(message_id),
                    received: session.ts_received(),
                };
                let formatted = self.formatter.format_or_fallback(&err, &original, &context);
                let exit_code = self
                    .pipeline(pipeline_name)
                    .and_then(|p| p.first_exit_with_state(ExitState::Error).map(|e| e.exit_code))
                    .unwrap_or(0);
                session.set_exit_state(ExitState::Error, exit_code);
                PipeLineResult::new(formatted, ExitState::Error, exit_code)
            }
        }
    }
}

/// Runs the exit handlers of a pipeline, logging their failures and panics.
pub(crate) async fn run_exit_handlers(
    pipeline: &PipeLine,
    message_id: &str,
    result: Option<&PipeLineResult>,
    session: &Session,
) {
    for handler in pipeline.exit_handlers() {
        let outcome = AssertUnwindSafe(handler.at_end_of_pipeline(message_id, result, session))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                pipeline = %pipeline.name(),
                handler = %handler.name(),
                error = %err,
                "Exit handler failed"
            ),
            Err(_) => error!(
                pipeline = %pipeline.name(),
                handler = %handler.name(),
                "Exit handler panicked"
            ),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("pipe_processors", &self.pipe_processors.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field(
                "pipeline_processors",
                &self.pipeline_processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("pipelines", &self.pipeline_names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    events: Option<Arc<dyn EventSink>>,
    formatter: Option<Arc<dyn ErrorMessageFormatter>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    pipe_processors: Option<Vec<Arc<dyn PipeProcessor>>>,
    pipeline_processors: Option<Vec<Arc<dyn PipeLineProcessor>>>,
}

impl EngineBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink (default: [`LoggingEventSink`]).
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Sets the error formatter (default: [`JsonErrorMessageFormatter`]).
    #[must_use]
    pub fn error_formatter(mut self, formatter: Arc<dyn ErrorMessageFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Sets the transaction manager (default: [`InMemoryTransactionManager`]).
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// Replaces the pipe processor chain, outermost step first.
    #[must_use]
    pub fn pipe_processors(mut self, chain: Vec<Arc<dyn PipeProcessor>>) -> Self {
        self.pipe_processors = Some(chain);
        self
    }

    /// Replaces the pipeline processor chain, outermost step first.
    #[must_use]
    pub fn pipeline_processors(mut self, chain: Vec<Arc<dyn PipeLineProcessor>>) -> Self {
        self.pipeline_processors = Some(chain);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            pipe_processors: self.pipe_processors.unwrap_or_else(default_pipe_chain),
            pipeline_processors: self.pipeline_processors.unwrap_or_else(default_pipeline_chain),
            pipelines: DashMap::new(),
            events: self.events.unwrap_or_else(|| Arc::new(LoggingEventSink::default())),
            formatter: self
                .formatter
                .unwrap_or_else(|| Arc::new(JsonErrorMessageFormatter::new())),
            transaction_manager: self
                .transaction_manager
                .unwrap_or_else(|| Arc::new(InMemoryTransactionManager::new())),
            warnings: ConfigurationWarnings::new(),
        }
    }
}

pub(crate) fn log_preview(message: &Message, session: &Session) -> String {
    if !message.is_repeatable() {
        return message.describe();
    }
    match message.as_string() {
        Ok(Some(text)) => {
            let masked = session.mask(&text);
            if masked.chars().count() > LOG_PREVIEW_CHARS {
                let cut: String = masked.chars().take(LOG_PREVIEW_CHARS).collect();
                format!("{cut}...")
            } else {
                masked
            }
        }
        Ok(None) => "<null>".to_string(),
        Err(_) => message.describe(),
    }
}
