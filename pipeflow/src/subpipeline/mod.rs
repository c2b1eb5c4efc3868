//! Calling another registered pipeline from a pipe.
//!
//! The called pipeline runs with a child [`Session`]: a fresh message id,
//! the parent's correlation id and hide patterns, and a depth one deeper.
//! Selected keys flow down before the call and back up after it; resources
//! that flow back up are closed by the parent.

use crate::core::{PipeLineResult, PipeRunResult, EXCEPTION_FORWARD_NAME};
use crate::errors::{ConfigurationError, PipeRunError};
use crate::events::{EventKind, PipeEvent};
use crate::message::Message;
use crate::pipeline::{run_exit_handlers, PipeLine};
use crate::pipes::{Pipe, PipeContext};
use crate::session::{Session, MESSAGE_ID_KEY};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Runs a registered pipeline as one step of the current one.
///
/// A SUCCESS exit continues on `success`. Any other exit continues on the
/// forward named after its exit code when the pipe declares one, and fails
/// the pipe otherwise.
#[derive(Debug, Clone)]
pub struct SubPipelinePipe {
    target: String,
    returned_session_keys: Option<String>,
    copied_session_keys: Vec<String>,
}

impl SubPipelinePipe {
    /// Calls the pipeline registered as `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            returned_session_keys: None,
            copied_session_keys: Vec::new(),
        }
    }

    /// Keys copied back from the child session, separated by `,` or `;`;
    /// `*` copies every key.
    #[must_use]
    pub fn with_returned_session_keys(mut self, keys: impl Into<String>) -> Self {
        self.returned_session_keys = Some(keys.into());
        self
    }

    /// Copies a key of the parent session into the child before the call.
    #[must_use]
    pub fn with_copied_session_key(mut self, key: impl Into<String>) -> Self {
        self.copied_session_keys.push(key.into());
        self
    }

    /// Name of the called pipeline.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    fn copy_down(&self, parent: &Session, child: &Session) {
        for key in &self.copied_session_keys {
            let Some(value) = parent.get(key) else {
                continue;
            };
            let resource = value.closeable();
            child.put(key.clone(), value);
            // the parent keeps ownership
            if let Some(resource) = resource {
                child.unschedule(resource.as_ref());
            }
        }
    }
}

#[async_trait]
impl Pipe for SubPipelinePipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        let engine = ctx.engine();
        let parent = ctx.session();
        let max_depth = engine.config().max_subpipeline_depth;
        if parent.depth() >= max_depth {
            return Err(PipeRunError::DepthExceeded {
                pipeline: self.target.clone(),
                max_depth,
            });
        }
        let target = engine.pipeline(&self.target).ok_or_else(|| {
            ConfigurationError::new(format!("No pipeline registered under name [{}]", self.target))
                .with_pipes(vec![ctx.pipe_name().to_string()])
        })?;

        let child = Arc::new(Session::child_of(parent));
        self.copy_down(parent, &child);
        let child_id = child
            .get_string(MESSAGE_ID_KEY)
            .unwrap_or_else(|| ctx.message_id().to_string());
        debug!(
            pipeline = %ctx.pipeline().name(),
            pipe = %ctx.pipe_name(),
            target = %self.target,
            child_message_id = %child_id,
            depth = child.depth(),
            "Calling sub-pipeline"
        );
        engine
            .events()
            .emit(
                PipeEvent::new(EventKind::SubPipelineStarted, ctx.pipeline().name())
                    .with_pipe(ctx.pipe_name())
                    .with_message_id(Some(ctx.message_id().to_string()))
                    .with_data(json!({ "target": self.target, "child_message_id": child_id, "depth": child.depth() })),
            )
            .await;

        let mut run = ChildRun::new(target.clone(), &child_id, child.clone(), message.clone());
        let outcome = {
            let _hidden = child.hide_scope(&target.hide_patterns());
            engine
                .run_to_exit(&target, &child_id, message.clone(), &child, None)
                .await
        };
        run.finish(outcome.as_ref().ok()).await;
        // the input belongs to the parent
        child.unschedule(&message);
        if let Some(keys) = &self.returned_session_keys {
            child.merge_into(keys, parent);
        }
        if let Ok(result) = &outcome {
            if !result.result.is_text() && !result.result.is_null() {
                parent.schedule_message_close(&result.result);
            }
        }
        child.close();
        let result = outcome?;

        engine
            .events()
            .emit(
                PipeEvent::new(EventKind::SubPipelineCompleted, ctx.pipeline().name())
                    .with_pipe(ctx.pipe_name())
                    .with_message_id(Some(ctx.message_id().to_string()))
                    .with_data(json!({
                        "target": self.target,
                        "state": result.state,
                        "exit_code": result.exit_code,
                    })),
            )
            .await;

        if result.is_successful() {
            return Ok(PipeRunResult::new(result.result, ctx.success_forward()?));
        }
        let by_code = result.exit_code.to_string();
        if ctx.has_forward(&by_code) {
            return Ok(PipeRunResult::new(result.result, ctx.forward(&by_code)?));
        }
        if ctx.has_forward(EXCEPTION_FORWARD_NAME) {
            return Ok(PipeRunResult::new(result.result, ctx.forward(EXCEPTION_FORWARD_NAME)?));
        }
        Err(PipeRunError::pipe_failed(
            ctx.pipe_name(),
            format!(
                "sub-pipeline [{}] ended in state [{}] with exit code [{}]",
                self.target, result.state, result.exit_code
            ),
        ))
    }
}

/// Exit handlers and cleanup of one child run.
///
/// When the calling pipe is dropped mid-run, for example by a transaction
/// timeout, the child's exit handlers still run and its session is closed,
/// on a spawned task.
struct ChildRun {
    pipeline: Arc<PipeLine>,
    message_id: String,
    session: Arc<Session>,
    input: Message,
    finished: bool,
}

impl ChildRun {
    fn new(pipeline: Arc<PipeLine>, message_id: &str, session: Arc<Session>, input: Message) -> Self {
        Self {
            pipeline,
            message_id: message_id.to_string(),
            session,
            input,
            finished: false,
        }
    }

    async fn finish(&mut self, result: Option<&PipeLineResult>) {
        self.finished = true;
        run_exit_handlers(&self.pipeline, &self.message_id, result, &self.session).await;
    }
}

impl Drop for ChildRun {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            pipeline = %self.pipeline.name(),
            message_id = %self.message_id,
            "Sub-pipeline call interrupted, finishing child run"
        );
        let pipeline = self.pipeline.clone();
        let message_id = std::mem::take(&mut self.message_id);
        let session = self.session.clone();
        // the input belongs to the parent
        session.unschedule(&self.input);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    run_exit_handlers(&pipeline, &message_id, None, &session).await;
                    session.close();
                });
            }
            Err(_) => {
                session.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::{PipeForward, PipeLineExit};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Engine, PipeLineBuilder, PipeSpec};
    use crate::pipes::{EchoPipe, FixedResultPipe, PutInSessionPipe};
    use crate::session::CORRELATION_ID_KEY;
    use crate::pipeline::ExitHandler;
    use crate::testing::{CountingCloseable, PipeHarness, SlowPipe};
    use crate::transaction::{TransactionAttribute, TransactionAttributes};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct SeenResults(Mutex<Vec<Option<bool>>>);

    #[async_trait]
    impl ExitHandler for SeenResults {
        fn name(&self) -> &str {
            "seen"
        }

        async fn at_end_of_pipeline(
            &self,
            _message_id: &str,
            result: Option<&PipeLineResult>,
            _session: &Session,
        ) -> anyhow::Result<()> {
            self.0.lock().push(result.map(PipeLineResult::is_successful));
            Ok(())
        }
    }

    fn register_child(engine: &Engine) {
        let child = PipeLineBuilder::new("child")
            .pipe(PipeSpec::new("store", Arc::new(PutInSessionPipe::new("fromChild"))))
            .unwrap()
            .pipe(PipeSpec::new("answer", Arc::new(FixedResultPipe::new("child says ${copied}").with_substitution())))
            .unwrap()
            .build(engine.warnings())
            .unwrap();
        engine.register(child);
    }

    fn parent(call: SubPipelinePipe) -> PipeLineBuilder {
        PipeLineBuilder::new("parent")
            .pipe(PipeSpec::new("call", Arc::new(call)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_child_runs_and_keys_flow_back() {
        let sink = Arc::new(CollectingEventSink::new());
        let engine = Engine::builder().event_sink(sink.clone()).build();
        register_child(&engine);
        let call = SubPipelinePipe::new("child")
            .with_copied_session_key("copied")
            .with_returned_session_keys("fromChild");
        let h = PipeHarness::with_engine(engine, parent(call)).unwrap();

        let session = Session::for_message(Some("m-1"), Some("corr-1"));
        session.put("copied", "hello");
        let result = h.run_in(&session, "input").await.unwrap();

        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("child says hello"));
        assert_eq!(session.get_string("fromChild").as_deref(), Some("input"));
        assert_eq!(session.get_string(CORRELATION_ID_KEY).as_deref(), Some("corr-1"));
        assert_eq!(sink.events_of_kind(EventKind::SubPipelineStarted).len(), 1);
        assert_eq!(sink.events_of_kind(EventKind::SubPipelineCompleted).len(), 1);
    }

    #[tokio::test]
    async fn test_copied_resource_stays_with_parent() {
        let engine = Engine::new();
        register_child(&engine);
        let call = SubPipelinePipe::new("child").with_copied_session_key("conn");
        let h = PipeHarness::with_engine(engine, parent(call)).unwrap();

        let session = Session::new();
        let conn = Arc::new(CountingCloseable::new());
        let resource: Arc<dyn crate::message::Closeable> = conn.clone();
        session.put("conn", resource);
        h.run_in(&session, "x").await.unwrap();
        assert_eq!(conn.close_count(), 0);

        session.close();
        assert_eq!(conn.close_count(), 1);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let engine = Engine::builder()
            .config(EngineConfig::default().with_max_subpipeline_depth(2))
            .build();
        let recursive = PipeLineBuilder::new("loop")
            .pipe(PipeSpec::new("again", Arc::new(SubPipelinePipe::new("loop"))))
            .unwrap();
        let h = PipeHarness::with_engine(engine, recursive).unwrap();

        let err = h.run("x").await.unwrap_err();
        assert!(matches!(err, PipeRunError::DepthExceeded { max_depth: 2, .. }));
    }

    #[tokio::test]
    async fn test_unknown_target_fails() {
        let h = PipeHarness::new(parent(SubPipelinePipe::new("missing"))).unwrap();
        assert!(matches!(h.run("x").await, Err(PipeRunError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_error_exit_routed_by_exit_code() {
        let engine = Engine::new();
        let failing_child = PipeLineBuilder::new("child")
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)).with_forward(PipeForward::success("REJECTED")))
            .unwrap()
            .exit(PipeLineExit::error("REJECTED").with_exit_code(422))
            .unwrap()
            .build(engine.warnings())
            .unwrap();
        engine.register(failing_child);
        let builder = PipeLineBuilder::new("parent")
            .pipe(PipeSpec::new("call", Arc::new(SubPipelinePipe::new("child"))).with_forward(PipeForward::new("422", "rejected")))
            .unwrap()
            .pipe(PipeSpec::new("rejected", Arc::new(FixedResultPipe::new("handled"))))
            .unwrap();
        let h = PipeHarness::with_engine(engine, builder).unwrap();

        let result = h.run("x").await.unwrap();
        assert!(result.is_successful());
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("handled"));
    }

    #[tokio::test]
    async fn test_exit_handlers_run_when_call_times_out() {
        let engine = Engine::new();
        let seen = Arc::new(SeenResults::default());
        let slow_child = PipeLineBuilder::new("child")
            .pipe(PipeSpec::new("slow", Arc::new(SlowPipe::with_delay_ms(200))))
            .unwrap()
            .exit_handler(seen.clone())
            .build(engine.warnings())
            .unwrap();
        engine.register(slow_child);
        let builder = PipeLineBuilder::new("parent")
            .pipe(
                PipeSpec::new("call", Arc::new(SubPipelinePipe::new("child"))).with_transaction(
                    TransactionAttributes::new(TransactionAttribute::Required).with_timeout(Duration::from_millis(20)),
                ),
            )
            .unwrap();
        let h = PipeHarness::with_engine(engine, builder).unwrap();

        assert!(matches!(h.run("x").await, Err(PipeRunError::Timeout { .. })));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.0.lock(), vec![None]);
    }

    #[tokio::test]
    async fn test_exit_handlers_run_once_on_completion() {
        let engine = Engine::new();
        let seen = Arc::new(SeenResults::default());
        let child = PipeLineBuilder::new("child")
            .pipe(PipeSpec::new("echo", Arc::new(EchoPipe)))
            .unwrap()
            .exit_handler(seen.clone())
            .build(engine.warnings())
            .unwrap();
        engine.register(child);
        let h = PipeHarness::with_engine(engine, parent(SubPipelinePipe::new("child"))).unwrap();

        h.run("x").await.unwrap();
        assert_eq!(*seen.0.lock(), vec![Some(true)]);
    }
}
