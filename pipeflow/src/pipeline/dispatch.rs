//! The dispatch loop: walks the pipe graph from the first pipe to an exit.

use super::context::PipeLineContext;
use super::engine::log_preview;
use super::graph::{ForwardTarget, PipeLine};
use super::spec::PipeSpec;
use crate::core::{PipeLineResult, PipeRunResult};
use crate::errors::PipeRunError;
use crate::message::Message;
use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

/// Runs one message through the pipeline graph.
///
/// This is the innermost step of the pipeline processor chain.
pub(crate) async fn run_pipeline_core(
    ctx: &PipeLineContext<'_>,
    message: Message,
) -> Result<PipeLineResult, PipeRunError> {
    let pipeline = ctx.pipeline();
    let mut message = message;

    if message.is_empty() {
        if let Some(pre) = pipeline.run_before_on_empty_input() {
            message = pre_process(ctx, pre, message).await?;
        }
    }

    let first = pipeline.pipe(ctx.first_pipe()).ok_or_else(|| PipeRunError::MissingPipe {
        pipeline: pipeline.name().to_string(),
        name: ctx.first_pipe().to_string(),
    })?;
    let mut target = ForwardTarget::Pipe(first);

    let mut redirected = false;
    if let Some(validator) = pipeline.input_validator() {
        let result = call(ctx, validator, message).await?;
        message = result.result;
        if !result.forward.is_success() {
            debug!(pipeline = %pipeline.name(), forward = %result.forward.name, "Input validation redirected the run");
            target = pipeline.resolve_forward(&validator.name, &result.forward)?;
            redirected = true;
        }
    }
    if !redirected {
        if let Some(wrapper) = pipeline.input_wrapper() {
            let result = call(ctx, wrapper, message).await?;
            message = result.result;
            if !result.forward.is_success() {
                target = pipeline.resolve_forward(&wrapper.name, &result.forward)?;
            }
        }
    }

    let mut output_validated = false;
    loop {
        match target {
            ForwardTarget::Pipe(spec) => {
                let result = call(ctx, spec, message).await?;
                if ctx.engine().config().log_intermediary_results {
                    debug!(
                        pipeline = %pipeline.name(),
                        pipe = %spec.name,
                        forward = %result.forward.name,
                        result = %log_preview(&result.result, ctx.session()),
                        "Pipe result"
                    );
                }
                message = result.result;
                target = pipeline.resolve_forward(&spec.name, &result.forward)?;
            }
            ForwardTarget::Exit(exit) => {
                if let Some(wrapper) = pipeline.output_wrapper() {
                    let result = call(ctx, wrapper, message).await?;
                    message = result.result;
                    if !result.forward.is_success() {
                        target = pipeline.resolve_forward(&wrapper.name, &result.forward)?;
                        continue;
                    }
                }
                if !output_validated {
                    if let Some(validator) = pipeline.output_validator() {
                        output_validated = true;
                        let result = call(ctx, validator, message).await?;
                        message = result.result;
                        if !result.forward.is_success() {
                            debug!(pipeline = %pipeline.name(), forward = %result.forward.name, "Output validation redirected the run");
                            target = pipeline.resolve_forward(&validator.name, &result.forward)?;
                            continue;
                        }
                    }
                }

                trace!(pipeline = %pipeline.name(), exit = %exit.name, state = %exit.state, "Reached exit");
                let result = if exit.empty_result { Message::null() } else { message };
                ctx.session().set_exit_state(exit.state, exit.exit_code);
                return Ok(PipeLineResult::new(result, exit.state, exit.exit_code));
            }
        }
    }
}

async fn call(ctx: &PipeLineContext<'_>, spec: &PipeSpec, message: Message) -> Result<PipeRunResult, PipeRunError> {
    trace!(pipeline = %ctx.pipeline().name(), pipe = %spec.name, message_id = %ctx.message_id(), "Calling pipe");
    ctx.engine()
        .run_pipe(ctx.pipeline(), spec, message, ctx.session(), ctx.message_id())
        .await
}

async fn pre_process(ctx: &PipeLineContext<'_>, name: &str, message: Message) -> Result<Message, PipeRunError> {
    let Some(pre) = ctx.engine().pipeline(name) else {
        warn!(
            pipeline = %ctx.pipeline().name(),
            pre_processor = %name,
            "Pre-processing pipeline for empty input is not registered, continuing without it"
        );
        return Ok(message);
    };
    debug!(pipeline = %ctx.pipeline().name(), pre_processor = %name, "Input is empty, running pre-processing pipeline");
    let result = run_nested(ctx, &pre, message).await?;
    if !result.is_successful() {
        return Err(PipeRunError::PreProcessing {
            pipeline: name.to_string(),
            state: result.state.to_string(),
        });
    }
    Ok(result.result)
}

/// Boxes a nested run so the future of [`Engine::run`] does not contain
/// itself.
///
/// [`Engine::run`]: super::Engine::run
fn run_nested<'a>(
    ctx: &'a PipeLineContext<'_>,
    pipeline: &'a PipeLine,
    message: Message,
) -> BoxFuture<'a, Result<PipeLineResult, PipeRunError>> {
    Box::pin(
        ctx.engine()
            .run(pipeline, ctx.message_id(), message, ctx.session(), None),
    )
}
