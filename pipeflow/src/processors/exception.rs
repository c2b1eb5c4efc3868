//! Recovery through the `exception` forward.

use super::chain::{PipeNext, PipeProcessor};
use crate::core::{PipeRunResult, EXCEPTION_FORWARD_NAME};
use crate::errors::PipeRunError;
use crate::events::{EventKind, PipeEvent};
use crate::message::Message;
use crate::pipes::PipeContext;
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

/// Turns a pipe failure into an error message sent down the pipe's
/// `exception` forward. Pipes without that forward fail the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionPipeProcessor;

#[async_trait]
impl PipeProcessor for ExceptionPipeProcessor {
    fn name(&self) -> &'static str {
        "exception"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let original = message.clone();
        let err = match next.proceed(ctx, message).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        if !ctx.has_forward(EXCEPTION_FORWARD_NAME) {
            return Err(err);
        }

        let masked = ctx.session().mask(&err.to_string());
        warn!(
            pipeline = %ctx.pipeline().name(),
            pipe = %ctx.pipe_name(),
            message_id = %ctx.message_id(),
            error = %masked,
            "Pipe failed, continuing at exception forward"
        );
        let formatted = ctx
            .engine()
            .formatter()
            .format_or_fallback(&err, &original, &ctx.error_context());
        ctx.engine()
            .events()
            .emit(
                PipeEvent::new(EventKind::PipeException, ctx.pipeline().name())
                    .with_pipe(ctx.pipe_name())
                    .with_message_id(Some(ctx.message_id().to_string()))
                    .with_data(json!({ "kind": err.kind(), "error": masked })),
            )
            .await;
        Ok(PipeRunResult::new(formatted, ctx.forward(EXCEPTION_FORWARD_NAME)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipeForward, PipeLineExit};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Engine, PipeLineBuilder, PipeSpec};
    use crate::pipes::ExceptionPipe;
    use crate::testing::PipeHarness;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn builder(with_exception_forward: bool) -> PipeLineBuilder {
        let mut spec = PipeSpec::new("fail", Arc::new(ExceptionPipe::new().with_message("broken input")));
        if with_exception_forward {
            spec = spec.with_forward(PipeForward::exception("ERROR"));
        }
        PipeLineBuilder::new("recovering")
            .pipe(spec)
            .unwrap()
            .exit(PipeLineExit::success("READY"))
            .unwrap()
            .exit(PipeLineExit::error("ERROR").with_exit_code(500))
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_routed_to_exception_forward() {
        let sink = Arc::new(CollectingEventSink::new());
        let engine = Engine::builder().event_sink(sink.clone()).build();
        let h = PipeHarness::with_engine(engine, builder(true)).unwrap();

        let result = h.run("payload").await.unwrap();
        assert_eq!(result.exit_code, 500);
        assert!(!result.is_successful());

        let doc: serde_json::Value =
            serde_json::from_str(&result.result.as_string().unwrap().unwrap()).unwrap();
        assert_eq!(doc["errorMessage"]["location"]["pipe"], "fail");
        assert_eq!(doc["errorMessage"]["originalMessage"]["content"], "payload");

        let events = sink.events_of_kind(EventKind::PipeException);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipe.as_deref(), Some("fail"));
    }

    #[tokio::test]
    async fn test_failure_without_exception_forward_propagates() {
        let h = PipeHarness::new(builder(false)).unwrap();
        let err = h.run("payload").await.unwrap_err();
        assert_eq!(err.pipe_in_error(), Some("fail"));
        assert!(err.to_string().contains("broken input"));
    }
}
