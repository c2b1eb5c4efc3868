//! Statistics, size checks, duration thresholds and log masking.

use super::chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::events::{EventKind, PipeEvent};
use crate::message::Message;
use crate::observability::SpanTimer;
use crate::pipeline::{Engine, PipeLineContext};
use crate::pipes::PipeContext;
use crate::statistics::{Statistics, StatisticsSink};
use crate::utils::timestamps::duration_millis;
use async_trait::async_trait;
use serde_json::json;
use std::slice;
use tracing::{debug, warn};

/// Outermost pipe step: records duration and sizes, reports slow pipes and
/// large messages, and activates the pipe's hide pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringPipeProcessor;

#[async_trait]
impl PipeProcessor for MonitoringPipeProcessor {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let spec = ctx.spec();
        let session = ctx.session();
        let _hidden = spec.hide_regex.as_ref().map(|r| session.hide_scope(slice::from_ref(r)));
        let stats = ctx.statistics();
        let site = SizeSite {
            engine: ctx.engine(),
            pipeline: ctx.pipeline().name(),
            pipe: Some(ctx.pipe_name()),
            message_id: ctx.message_id(),
        };

        site.record(&stats.size_in, &message, "input").await;
        let timer = SpanTimer::start(&spec.name);
        let result = next.proceed(ctx, message).await;
        let elapsed = timer.finish();
        stats.duration.add_value(duration_millis(elapsed));

        if let Some(threshold) = spec.duration_threshold {
            if elapsed > threshold {
                warn!(
                    pipeline = %ctx.pipeline().name(),
                    pipe = %spec.name,
                    duration_ms = duration_millis(elapsed),
                    threshold_ms = duration_millis(threshold),
                    "Pipe exceeded its duration threshold"
                );
                ctx.engine()
                    .events()
                    .emit(
                        PipeEvent::new(EventKind::PipeLongDuration, ctx.pipeline().name())
                            .with_pipe(&spec.name)
                            .with_message_id(Some(ctx.message_id().to_string()))
                            .with_data(json!({
                                "duration_ms": duration_millis(elapsed),
                                "threshold_ms": duration_millis(threshold),
                            })),
                    )
                    .await;
            }
        }

        if let Ok(outcome) = &result {
            site.record(&stats.size_out, &outcome.result, "output").await;
        }
        result
    }
}

/// Outermost pipeline step: run statistics and start/finish events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringPipeLineProcessor;

#[async_trait]
impl PipeLineProcessor for MonitoringPipeLineProcessor {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let pipeline = ctx.pipeline();
        let events = ctx.engine().events();
        let site = SizeSite {
            engine: ctx.engine(),
            pipeline: pipeline.name(),
            pipe: None,
            message_id: ctx.message_id(),
        };
        site.record(&pipeline.statistics().size, &message, "input").await;

        events
            .emit(
                PipeEvent::new(EventKind::PipelineStarted, pipeline.name())
                    .with_message_id(Some(ctx.message_id().to_string())),
            )
            .await;
        let timer = SpanTimer::start(pipeline.name());
        let result = next.proceed(ctx, message).await;
        let duration_ms = duration_millis(timer.finish());
        pipeline.statistics().duration.add_value(duration_ms);

        let event = match &result {
            Ok(outcome) => {
                debug!(
                    pipeline = %pipeline.name(),
                    message_id = %ctx.message_id(),
                    state = %outcome.state,
                    duration_ms,
                    "Pipeline run completed"
                );
                PipeEvent::new(EventKind::PipelineCompleted, pipeline.name()).with_data(json!({
                    "state": outcome.state,
                    "exit_code": outcome.exit_code,
                    "duration_ms": duration_ms,
                }))
            }
            Err(err) => PipeEvent::new(EventKind::PipelineFailed, pipeline.name()).with_data(json!({
                "kind": err.kind(),
                "error": ctx.session().mask(&err.to_string()),
                "duration_ms": duration_ms,
            })),
        };
        events
            .emit(event.with_message_id(Some(ctx.message_id().to_string())))
            .await;
        result
    }
}

struct SizeSite<'a> {
    engine: &'a Engine,
    pipeline: &'a str,
    pipe: Option<&'a str>,
    message_id: &'a str,
}

impl SizeSite<'_> {
    /// Records the size of a message and reports it when above the limit.
    /// Streams have no known size and are skipped.
    async fn record(&self, stats: &Statistics, message: &Message, direction: &str) {
        let Some(size) = message.size() else {
            return;
        };
        stats.add_value(size);
        let Some(limit) = self.engine.config().message_size_warn_bytes else {
            return;
        };
        if size <= limit {
            return;
        }
        warn!(
            pipeline = %self.pipeline,
            pipe = self.pipe.unwrap_or("-"),
            size,
            limit,
            direction,
            "Message size exceeds warning threshold"
        );
        let mut event = PipeEvent::new(EventKind::PipeMessageSize, self.pipeline)
            .with_message_id(Some(self.message_id.to_string()))
            .with_data(json!({ "size": size, "limit": limit, "direction": direction }));
        if let Some(pipe) = self.pipe {
            event = event.with_pipe(pipe);
        }
        self.engine.events().emit(event).await;
    }
}
