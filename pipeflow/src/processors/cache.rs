//! Result caching for pipes and pipelines.

use super::chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
use crate::cache::Cache;
use crate::core::{ExitState, PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::events::{EventKind, PipeEvent};
use crate::message::Message;
use crate::pipeline::{Engine, PipeLineContext};
use crate::pipes::PipeContext;
use crate::session::Session;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Returns a cached result instead of calling the pipe. A hit takes the
/// `success` forward.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePipeProcessor;

#[async_trait]
impl PipeProcessor for CachePipeProcessor {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let Some(cache) = ctx.spec().cache.as_deref() else {
            return next.proceed(ctx, message).await;
        };
        let Some(key) = cache.transform_key(&message, ctx.session())? else {
            return next.proceed(ctx, message).await;
        };

        let site = HitSite {
            engine: ctx.engine(),
            pipeline: ctx.pipeline().name(),
            pipe: Some(ctx.pipe_name()),
            message_id: ctx.message_id(),
        };
        if let Some(value) = site.lookup(cache, &key).await {
            return Ok(PipeRunResult::new(value, ctx.success_forward()?));
        }

        let result = next.proceed(ctx, message).await?;
        if result.is_successful() {
            store(cache, key, &result.result, ctx.session())?;
        }
        Ok(result)
    }
}

/// Returns a cached result instead of running the pipeline. A hit is
/// reported as SUCCESS with exit code 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePipeLineProcessor;

#[async_trait]
impl PipeLineProcessor for CachePipeLineProcessor {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let Some(cache) = ctx.pipeline().cache() else {
            return next.proceed(ctx, message).await;
        };
        let Some(key) = cache.transform_key(&message, ctx.session())? else {
            return next.proceed(ctx, message).await;
        };

        let site = HitSite {
            engine: ctx.engine(),
            pipeline: ctx.pipeline().name(),
            pipe: None,
            message_id: ctx.message_id(),
        };
        if let Some(value) = site.lookup(cache.as_ref(), &key).await {
            return Ok(PipeLineResult::new(value, ExitState::Success, 0));
        }

        let result = next.proceed(ctx, message).await?;
        if result.is_successful() {
            store(cache.as_ref(), key, &result.result, ctx.session())?;
        }
        Ok(result)
    }
}

struct HitSite<'a> {
    engine: &'a Engine,
    pipeline: &'a str,
    pipe: Option<&'a str>,
    message_id: &'a str,
}

impl HitSite<'_> {
    async fn lookup(&self, cache: &dyn Cache, key: &str) -> Option<Message> {
        let value = cache.get(key)?;
        debug!(cache = %cache.name(), pipeline = %self.pipeline, pipe = ?self.pipe, "Cache hit");
        let mut event = PipeEvent::new(EventKind::CacheHit, self.pipeline)
            .with_message_id(Some(self.message_id.to_string()))
            .with_data(json!({ "cache": cache.name() }));
        if let Some(pipe) = self.pipe {
            event = event.with_pipe(pipe);
        }
        self.engine.events().emit(event).await;
        Some(Message::text(value))
    }
}

fn store(cache: &dyn Cache, key: String, result: &Message, session: &Session) -> Result<(), PipeRunError> {
    if let Some(value) = cache.transform_value(result, session)? {
        cache.put(key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cache::{CacheConfig, InMemoryCache};
    use crate::core::PipeForward;
    use crate::events::{CollectingEventSink, EventKind};
    use crate::pipeline::{Engine, PipeLineBuilder, PipeSpec};
    use crate::pipes::SwitchPipe;
    use crate::testing::{PipeHarness, RecordingPipe};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn cache() -> Arc<InMemoryCache> {
        Arc::new(InMemoryCache::new(CacheConfig::new("results")).unwrap())
    }

    #[tokio::test]
    async fn test_pipe_result_served_from_cache() {
        let recorder = Arc::new(RecordingPipe::new());
        let cache = cache();
        let sink = Arc::new(CollectingEventSink::new());
        let engine = Engine::builder().event_sink(sink.clone()).build();
        let builder = PipeLineBuilder::new("cached")
            .pipe(PipeSpec::new("pipe", recorder.clone()).with_cache(cache.clone()))
            .unwrap();
        let h = PipeHarness::with_engine(engine, builder).unwrap();

        let first = h.run("same").await.unwrap();
        let second = h.run("same").await.unwrap();
        assert_eq!(recorder.inputs().len(), 1);
        assert_eq!(
            first.result.as_string().unwrap(),
            second.result.as_string().unwrap()
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(sink.events_of_kind(EventKind::CacheHit).len(), 1);

        h.run("other").await.unwrap();
        assert_eq!(recorder.inputs().len(), 2);
    }

    #[tokio::test]
    async fn test_unsuccessful_result_not_cached() {
        let cache = cache();
        let spec = PipeSpec::new("route", Arc::new(SwitchPipe::new()))
            .with_forward(PipeForward::new("reject", "ERROR"))
            .with_forward(PipeForward::success("READY"))
            .with_cache(cache.clone());
        let h = PipeHarness::for_spec(spec).unwrap();

        let result = h.run("reject").await.unwrap();
        assert!(!result.is_successful());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_result_served_from_cache() {
        let recorder = Arc::new(RecordingPipe::new());
        let builder = PipeLineBuilder::new("cached")
            .pipe(PipeSpec::new("pipe", recorder.clone()))
            .unwrap()
            .cache(cache());
        let h = PipeHarness::new(builder).unwrap();

        h.run("key").await.unwrap();
        let hit = h.run("key").await.unwrap();
        assert!(hit.is_successful());
        assert_eq!(hit.exit_code, 0);
        assert_eq!(recorder.inputs(), vec!["key".to_string()]);
    }
}
