//! Concurrency limits for pipes and pipelines.

use super::chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::message::Message;
use crate::pipeline::PipeLineContext;
use crate::pipes::PipeContext;
use crate::statistics::StatisticsSink;
use crate::utils::timestamps::duration_millis;
use async_trait::async_trait;

/// Limits concurrent calls of a pipe to its `max_threads`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottlePipeProcessor;

#[async_trait]
impl PipeProcessor for ThrottlePipeProcessor {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let spec = ctx.spec();
        let Some(throttle) = spec.throttle.get_or_init(&spec.name, spec.max_threads) else {
            return next.proceed(ctx, message).await;
        };
        let permit = throttle.acquire().await?;
        ctx.statistics().wait.add_value(duration_millis(permit.waited()));
        let result = next.proceed(ctx, message).await;
        permit.release();
        result
    }
}

/// Limits concurrent runs of a pipeline to its `max_threads`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottlePipeLineProcessor;

#[async_trait]
impl PipeLineProcessor for ThrottlePipeLineProcessor {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let pipeline = ctx.pipeline();
        let Some(throttle) = pipeline.throttle() else {
            return next.proceed(ctx, message).await;
        };
        let permit = throttle.acquire().await?;
        pipeline.statistics().wait.add_value(duration_millis(permit.waited()));
        let result = next.proceed(ctx, message).await;
        permit.release();
        result
    }
}
