//! Routing by forward name.

use super::{Pipe, PipeContext};
use crate::core::PipeRunResult;
use crate::errors::PipeRunError;
use crate::message::Message;
use async_trait::async_trait;

/// Chooses the forward named by the message text or a session value.
///
/// The input is passed on unchanged.
#[derive(Debug, Clone, Default)]
pub struct SwitchPipe {
    session_key: Option<String>,
    not_found_forward: Option<String>,
    empty_forward: Option<String>,
}

impl SwitchPipe {
    /// Routes on the (trimmed) message text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes on the value of a session key instead.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Forward used when the named forward does not exist.
    #[must_use]
    pub fn with_not_found_forward(mut self, name: impl Into<String>) -> Self {
        self.not_found_forward = Some(name.into());
        self
    }

    /// Forward used when the routing value is empty.
    #[must_use]
    pub fn with_empty_forward(mut self, name: impl Into<String>) -> Self {
        self.empty_forward = Some(name.into());
        self
    }
}

#[async_trait]
impl Pipe for SwitchPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        let mut name = match &self.session_key {
            Some(key) => ctx.session().get_string(key).unwrap_or_default(),
            None => {
                message.preserve()?;
                message.as_string_or_empty()?.trim().to_string()
            }
        };
        if name.is_empty() {
            if let Some(empty) = &self.empty_forward {
                name.clone_from(empty);
            }
        }

        if ctx.has_forward(&name) {
            return Ok(PipeRunResult::new(message, ctx.forward(&name)?));
        }
        if let Some(fallback) = &self.not_found_forward {
            if ctx.has_forward(fallback) {
                return Ok(PipeRunResult::new(message, ctx.forward(fallback)?));
            }
        }
        Err(PipeRunError::pipe_failed(
            ctx.pipe_name(),
            format!("cannot find forward or pipe named [{name}]"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipeForward, PipeLineExit};
    use crate::pipeline::{PipeLineBuilder, PipeSpec};
    use crate::pipes::FixedResultPipe;
    use crate::session::Session;
    use crate::testing::PipeHarness;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn harness(switch: SwitchPipe) -> PipeHarness {
        let builder = PipeLineBuilder::new("router")
            .pipe(
                PipeSpec::new("switch", Arc::new(switch))
                    .with_forward(PipeForward::new("left", "left"))
                    .with_forward(PipeForward::new("right", "right"))
                    .with_forward(PipeForward::new("other", "right")),
            )
            .unwrap()
            .pipe(PipeSpec::new("left", Arc::new(FixedResultPipe::new("L"))).with_forward(PipeForward::success("READY")))
            .unwrap()
            .pipe(PipeSpec::new("right", Arc::new(FixedResultPipe::new("R"))))
            .unwrap()
            .exit(PipeLineExit::success("READY"))
            .unwrap();
        PipeHarness::new(builder).unwrap()
    }

    #[tokio::test]
    async fn test_routes_on_message_text() {
        let h = harness(SwitchPipe::new());
        let left = h.run(" left ").await.unwrap();
        assert_eq!(left.result.as_string().unwrap().as_deref(), Some("L"));
        let right = h.run("right").await.unwrap();
        assert_eq!(right.result.as_string().unwrap().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_routes_on_session_key() {
        let h = harness(SwitchPipe::new().with_session_key("route"));
        let session = Session::new();
        session.put("route", "right");
        let result = h.run_in(&session, "left").await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_unknown_name_uses_not_found_forward() {
        let h = harness(SwitchPipe::new().with_not_found_forward("other"));
        let result = h.run("nowhere").await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_empty_value_uses_empty_forward() {
        let h = harness(SwitchPipe::new().with_empty_forward("left"));
        let result = h.run("").await.unwrap();
        assert_eq!(result.result.as_string().unwrap().as_deref(), Some("L"));
    }

    #[tokio::test]
    async fn test_unknown_name_without_fallback_fails() {
        let h = harness(SwitchPipe::new());
        let err = h.run("nowhere").await.unwrap_err();
        assert_eq!(err.pipe_in_error(), Some("switch"));
    }
}
