//! Transaction demarcation around pipes and pipelines.

use super::chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::message::Message;
use crate::pipeline::PipeLineContext;
use crate::pipes::PipeContext;
use crate::transaction::TransactionGuard;
use async_trait::async_trait;
use tracing::trace;

/// Runs a pipe inside the transaction scope its spec asks for.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionPipeProcessor;

#[async_trait]
impl PipeProcessor for TransactionPipeProcessor {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn process_pipe(
        &self,
        ctx: &PipeContext<'_>,
        message: Message,
        next: PipeNext<'_>,
    ) -> Result<PipeRunResult, PipeRunError> {
        let attributes = ctx.spec().transaction;
        if attributes.is_passthrough() {
            return next.proceed(ctx, message).await;
        }
        let owner = format!("{}/{}", ctx.pipeline().name(), ctx.pipe_name());
        trace!(owner = %owner, attribute = %attributes.attribute, "Entering transaction scope");
        let mut guard = TransactionGuard::new(owner, attributes, ctx.engine().transaction_manager().clone());
        guard.execute(ctx.session(), next.proceed(ctx, message)).await
    }
}

/// Runs a pipeline inside the transaction scope it asks for.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionPipeLineProcessor;

#[async_trait]
impl PipeLineProcessor for TransactionPipeLineProcessor {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn process_pipeline(
        &self,
        ctx: &PipeLineContext<'_>,
        message: Message,
        next: PipeLineNext<'_>,
    ) -> Result<PipeLineResult, PipeRunError> {
        let attributes = ctx.pipeline().transaction();
        if attributes.is_passthrough() {
            return next.proceed(ctx, message).await;
        }
        let mut guard = TransactionGuard::new(
            ctx.pipeline().name(),
            attributes,
            ctx.engine().transaction_manager().clone(),
        );
        guard.execute(ctx.session(), next.proceed(ctx, message)).await
    }
}
