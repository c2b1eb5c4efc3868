//! Small general-purpose pipes.

use super::{Pipe, PipeContext};
use crate::core::PipeRunResult;
use crate::errors::PipeRunError;
use crate::message::Message;
use crate::session::Session;
use async_trait::async_trait;

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPipe;

#[async_trait]
impl Pipe for EchoPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        Ok(PipeRunResult::new(message, ctx.success_forward()?))
    }
}

/// Returns a fixed text, optionally filling `${key}` placeholders from the session.
#[derive(Debug, Clone)]
pub struct FixedResultPipe {
    text: String,
    substitute: bool,
}

impl FixedResultPipe {
    /// Creates a pipe returning `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            substitute: false,
        }
    }

    /// Replaces `${key}` with the session value of `key`.
    #[must_use]
    pub const fn with_substitution(mut self) -> Self {
        self.substitute = true;
        self
    }

    fn render(&self, session: &Session) -> String {
        if !self.substitute {
            return self.text.clone();
        }
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match session.get_string(key) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push_str("${");
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[async_trait]
impl Pipe for FixedResultPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, _message: Message) -> Result<PipeRunResult, PipeRunError> {
        Ok(PipeRunResult::new(self.render(ctx.session()), ctx.success_forward()?))
    }
}

/// Always fails, with the input text or a fixed text as the error message.
#[derive(Debug, Clone, Default)]
pub struct ExceptionPipe {
    message: Option<String>,
}

impl ExceptionPipe {
    /// Fails with the input message as error text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with a fixed error text.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
impl Pipe for ExceptionPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        let text = match &self.message {
            Some(text) => text.clone(),
            None => message.as_string_or_empty()?,
        };
        let text = if text.is_empty() {
            "exception thrown with no message".to_string()
        } else {
            text
        };
        Err(PipeRunError::pipe_failed(ctx.pipe_name(), text))
    }
}

/// Stores its input (or a fixed value) under a session key and passes the input on.
#[derive(Debug, Clone)]
pub struct PutInSessionPipe {
    session_key: String,
    value: Option<String>,
}

impl PutInSessionPipe {
    /// Stores the input under `session_key`.
    #[must_use]
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            value: None,
        }
    }

    /// Stores a fixed value instead of the input.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[async_trait]
impl Pipe for PutInSessionPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        match &self.value {
            Some(value) => {
                ctx.session().put(self.session_key.clone(), value.as_str());
            }
            None => {
                message.preserve()?;
                ctx.session().put(self.session_key.clone(), message.clone());
            }
        }
        Ok(PipeRunResult::new(message, ctx.success_forward()?))
    }
}
