//! Exclusive locks around pipes and pipelines.

use super::chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::events::{EventKind, PipeEvent};
use crate::locking::{LockBusyPolicy, LockToken, Locker};
use crate::message::Message;
use crate::pipeline::PipeLineContext;
use crate::pipes::PipeContext;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Holds the pipe's lock while the rest of the chain runs.
///
/// A busy lock fails the pipe, or with [`LockBusyPolicy::Skip`] passes the
/// input on along the `success` forward without calling the pipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockerPipeProcessor;

#[async_trait]
impl PipeProcessor for LockerPipeProcessor {
    fn name(&self) -> &'static str {
        "locker"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let Some(locker) = ctx.spec().locker.as_ref() else {
            return next.proceed(ctx, message).await;
        };
        let Some(token) = locker.acquire().await? else {
            let policy = ctx
                .spec()
                .lock_busy_policy
                .unwrap_or(ctx.engine().config().pipe_lock_busy_policy);
            return match policy {
                LockBusyPolicy::Fail => Err(PipeRunError::LockNotAcquired {
                    lock: locker.object_id().to_string(),
                    pipe: ctx.pipe_name().to_string(),
                }),
                LockBusyPolicy::Skip => {
                    debug!(pipe = %ctx.pipe_name(), lock = %locker.object_id(), "Lock busy, skipping pipe");
                    Ok(PipeRunResult::new(message, ctx.success_forward()?))
                }
            };
        };

        let held = HeldLock::new(locker, token);
        let result = next.proceed(ctx, message).await;
        held.release().await;
        result
    }
}

/// Holds the pipeline's lock for the whole run.
///
/// A busy lock skips the run with an empty SUCCESS result, or with
/// [`LockBusyPolicy::Fail`] fails it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockerPipeLineProcessor;

#[async_trait]
impl PipeLineProcessor for LockerPipeLineProcessor {
    fn name(&self) -> &'static str {
        "locker"
    }

    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let pipeline = ctx.pipeline();
        let Some(locker) = pipeline.locker() else {
            return next.proceed(ctx, message).await;
        };
        let Some(token) = locker.acquire().await? else {
            let policy = pipeline
                .lock_busy_policy()
                .unwrap_or(ctx.engine().config().pipeline_lock_busy_policy);
            return match policy {
                LockBusyPolicy::Fail => Err(PipeRunError::LockNotAcquired {
                    lock: locker.object_id().to_string(),
                    pipe: pipeline.name().to_string(),
                }),
                LockBusyPolicy::Skip => {
                    info!(
                        pipeline = %pipeline.name(),
                        lock = %locker.object_id(),
                        message_id = %ctx.message_id(),
                        "Lock busy, skipping pipeline run"
                    );
                    ctx.engine()
                        .events()
                        .emit(
                            PipeEvent::new(EventKind::PipelineLockSkipped, pipeline.name())
                                .with_message_id(Some(ctx.message_id().to_string()))
                                .with_data(serde_json::json!({ "lock": locker.object_id() })),
                        )
                        .await;
                    Ok(PipeLineResult::skipped())
                }
            };
        };

        let held = HeldLock::new(locker, token);
        let result = next.proceed(ctx, message).await;
        held.release().await;
        result
    }
}

/// A lock held for the rest of the chain.
///
/// Released by [`HeldLock::release`]; when dropped unreleased, for example
/// because a transaction timeout dropped the chain, the release runs on a
/// spawned task.
struct HeldLock {
    locker: Arc<dyn Locker>,
    token: Option<LockToken>,
}

impl HeldLock {
    fn new(locker: &Arc<dyn Locker>, token: LockToken) -> Self {
        Self {
            locker: locker.clone(),
            token: Some(token),
        }
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            release(self.locker.as_ref(), token).await;
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        warn!(lock = %self.locker.object_id(), "Protected work was interrupted, releasing lock");
        match Handle::try_current() {
            Ok(handle) => {
                let locker = self.locker.clone();
                handle.spawn(async move { release(locker.as_ref(), token).await });
            }
            Err(_) => warn!(
                lock = %self.locker.object_id(),
                "No runtime to release lock on, it is kept until it expires"
            ),
        }
    }
}

async fn release(locker: &dyn Locker, token: LockToken) {
    if let Err(err) = locker.release(token).await {
        warn!(lock = %locker.object_id(), error = %err, "Could not release lock");
    }
}
