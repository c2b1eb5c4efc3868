//! Processor chain for ordered middleware around pipes and pipelines.

use super::base::execute_pipe;
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::message::Message;
use crate::pipeline::{run_pipeline_core, PipeLineContext};
use crate::pipes::PipeContext;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// A step wrapped around every pipe call.
///
/// A step may change the message before calling `next`, replace the result
/// after it, return without calling `next`, or turn an error into a result.
#[async_trait]
pub trait PipeProcessor: Send + Sync + Debug {
    /// Step name for logs.
    fn name(&self) -> &'static str;

    /// Processes one pipe call.
    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError>;
}

/// A step wrapped around every pipeline run.
#[async_trait]
pub trait PipeLineProcessor: Send + Sync + Debug {
    /// Step name for logs.
    fn name(&self) -> &'static str;

    /// Processes one pipeline run.
    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError>;
}

/// The rest of a pipe chain; calling [`proceed`](Self::proceed) runs it.
///
/// When no steps remain, proceeding executes the pipe itself.
#[derive(Clone, Copy)]
pub struct PipeNext<'a> {
    remaining: &'a [Arc<dyn PipeProcessor>],
}

impl<'a> PipeNext<'a> {
    /// Wraps a chain, outermost step first.
    #[must_use]
    pub const fn new(chain: &'a [Arc<dyn PipeProcessor>]) -> Self {
        Self { remaining: chain }
    }

    /// The end of a chain: proceeding calls the pipe directly.
    #[must_use]
    pub const fn terminal() -> Self {
        Self { remaining: &[] }
    }

    /// Runs the remaining steps and then the pipe.
    pub async fn proceed(self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        match self.remaining.split_first() {
            Some((step, rest)) => step.process_pipe(ctx, message, PipeNext { remaining: rest }).await,
            None => execute_pipe(ctx, message).await,
        }
    }
}

impl Debug for PipeNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.remaining.iter().map(|p| p.name()))
            .finish()
    }
}

/// The rest of a pipeline chain; the innermost step is the dispatch loop.
#[derive(Clone, Copy)]
pub struct PipeLineNext<'a> {
    remaining: &'a [Arc<dyn PipeLineProcessor>],
}

impl<'a> PipeLineNext<'a> {
    /// Wraps a chain, outermost step first.
    #[must_use]
    pub const fn new(chain: &'a [Arc<dyn PipeLineProcessor>]) -> Self {
        Self { remaining: chain }
    }

    /// The end of a chain: proceeding runs the dispatch loop directly.
    #[must_use]
    pub const fn terminal() -> Self {
        Self { remaining: &[] }
    }

    /// Runs the remaining steps and then the dispatch loop.
    pub async fn proceed(
        self,
        ctx: &PipeLineContext<'_>,
        message: Message,
    ) -> Result<PipeLineResult, PipeRunError> {
        match self.remaining.split_first() {
            Some((step, rest)) => {
                step.process_pipeline(ctx, message, PipeLineNext { remaining: rest })
                    .await
            }
            None => run_pipeline_core(ctx, message).await,
        }
    }
}

impl Debug for PipeLineNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.remaining.iter().map(|p| p.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::EchoPipe;
    use crate::testing::PipeHarness;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Tagging {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PipeProcessor for Tagging {
        fn name(&self) -> &'static str {
            self.tag
        }

        async fn process_pipe(
            &self,
            ctx: &PipeContext<'_>,
            message: Message,
            next: PipeNext<'_>,
        ) -> Result<PipeRunResult, PipeRunError> {
            self.log.lock().push(format!("{}>", self.tag));
            let result = next.proceed(ctx, message).await;
            self.log.lock().push(format!("<{}", self.tag));
            result
        }
    }

    #[derive(Debug)]
    struct ShortCircuit;

    #[async_trait]
    impl PipeProcessor for ShortCircuit {
        fn name(&self) -> &'static str {
            "short"
        }

        async fn process_pipe(
            &self,
            ctx: &PipeContext<'_>,
            _message: Message,
            _next: PipeNext<'_>,
        ) -> Result<PipeRunResult, PipeRunError> {
            Ok(PipeRunResult::new("short-circuited", ctx.success_forward()?))
        }
    }

    #[tokio::test]
    async fn test_steps_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn PipeProcessor>> = vec![
            Arc::new(Tagging { tag: "outer", log: log.clone() }),
            Arc::new(Tagging { tag: "inner", log: log.clone() }),
        ];
        let harness = PipeHarness::single(EchoPipe).unwrap();
        let pipeline = harness.pipeline();
        let spec = pipeline.pipe("pipe").unwrap();
        let session = crate::session::Session::new();
        let ctx = PipeContext::new(harness.engine(), pipeline, spec, &session, "m1");

        let result = PipeNext::new(&chain).proceed(&ctx, Message::text("x")).await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("x"));
        assert_eq!(*log.lock(), vec!["outer>", "inner>", "<inner", "<outer"]);
    }

    #[tokio::test]
    async fn test_step_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn PipeProcessor>> = vec![
            Arc::new(ShortCircuit),
            Arc::new(Tagging { tag: "never", log: log.clone() }),
        ];
        let harness = PipeHarness::single(EchoPipe).unwrap();
        let pipeline = harness.pipeline();
        let session = crate::session::Session::new();
        let ctx = PipeContext::new(harness.engine(), pipeline, pipeline.pipe("pipe").unwrap(), &session, "m1");

        let result = PipeNext::new(&chain).proceed(&ctx, Message::text("x")).await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("short-circuited"));
        assert!(log.lock().is_empty());
        assert_eq!(format!("{:?}", PipeNext::new(&chain)), r#"["short", "never"]"#);
    }
}
