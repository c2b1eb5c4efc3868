//! Closure-backed pipe.

use super::{Pipe, PipeContext};
use crate::core::PipeRunResult;
use crate::errors::PipeRunError;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt::{self, Debug};

/// A pipe whose behaviour is a synchronous closure.
pub struct FnPipe<F>
where
    F: Fn(&PipeContext<'_>, Message) -> Result<PipeRunResult, PipeRunError> + Send + Sync,
{
    label: String,
    func: F,
}

impl<F> FnPipe<F>
where
    F: Fn(&PipeContext<'_>, Message) -> Result<PipeRunResult, PipeRunError> + Send + Sync,
{
    /// Creates a closure pipe; `label` only shows up in debug output.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }
}

impl<F> Debug for FnPipe<F>
where
    F: Fn(&PipeContext<'_>, Message) -> Result<PipeRunResult, PipeRunError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPipe").field("label", &self.label).finish()
    }
}

#[async_trait]
impl<F> Pipe for FnPipe<F>
where
    F: Fn(&PipeContext<'_>, Message) -> Result<PipeRunResult, PipeRunError> + Send + Sync,
{
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        (self.func)(ctx, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PipeHarness;

    #[tokio::test]
    async fn test_fn_pipe_uppercases() {
        let pipe = FnPipe::new("upper", |ctx: &PipeContext<'_>, message: Message| {
            let text = message.as_string_or_empty()?.to_uppercase();
            Ok(PipeRunResult::new(text, ctx.success_forward()?))
        });
        let harness = PipeHarness::single(pipe).unwrap();
        let result = harness.run("abc").await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn test_fn_pipe_debug_shows_label() {
        let pipe = FnPipe::new("noop", |ctx: &PipeContext<'_>, m: Message| {
            Ok(PipeRunResult::new(m, ctx.success_forward()?))
        });
        assert!(format!("{pipe:?}").contains("noop"));
    }
}
