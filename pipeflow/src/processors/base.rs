//! Base execution: input selection, the pipe call itself and result routing.

use crate::core::PipeRunResult;
use crate::errors::PipeRunError;
use crate::message::Message;
use crate::pipes::PipeContext;
use tracing::{debug, trace};

/// Calls the pipe, applying the input and output options of its spec.
///
/// The input is the fixed value, the session value, or the incoming
/// message, in that order of preference. With a result session key the
/// result is stored there and the input is passed on; with
/// `preserve_input` the incoming message is passed on.
pub(crate) async fn execute_pipe(ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
    let spec = ctx.spec();
    let incoming = message;
    if spec.preserve_input {
        incoming.preserve()?;
    }

    let input = if let Some(fixed) = &spec.input_fixed_value {
        Message::text(fixed.as_str())
    } else if let Some(key) = &spec.input_session_key {
        ctx.session().get_message(key).ok_or_else(|| {
            PipeRunError::pipe_failed(&spec.name, format!("input session key [{key}] not found"))
        })?
    } else {
        incoming.clone()
    };

    if spec.skip_on_empty_input && input.is_empty() {
        debug!(pipeline = %ctx.pipeline().name(), pipe = %spec.name, "Skipping pipe for empty input");
        return Ok(PipeRunResult::new(input, ctx.success_forward()?));
    }

    trace!(pipeline = %ctx.pipeline().name(), pipe = %spec.name, "Executing pipe");
    let mut result = spec.pipe.do_pipe(ctx, input.clone()).await?;

    if let Some(key) = &spec.result_session_key {
        debug!(pipe = %spec.name, key = %key, "Storing pipe result in session");
        ctx.session().put(key.clone(), result.result.clone());
        result.result = input;
    }
    if spec.preserve_input {
        result.result = incoming;
    }
    Ok(result)
}
