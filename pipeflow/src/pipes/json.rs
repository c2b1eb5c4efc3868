//! JSON validation and wrapping; usable as regular pipes or as the
//! validators and wrappers of a pipeline.

use super::{Pipe, PipeContext};
use crate::core::PipeRunResult;
use crate::errors::PipeRunError;
use crate::message::{Message, MessageContext};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

/// Forward a validator takes when the message is invalid.
pub const FAILURE_FORWARD_NAME: &str = "failure";

/// Checks that the message is a JSON object carrying the required fields.
///
/// Invalid messages take the `failure` forward when one is declared,
/// otherwise the pipe fails. The reason is stored under the reason session
/// key when set.
#[derive(Debug, Clone, Default)]
pub struct JsonValidatorPipe {
    required_fields: Vec<String>,
    reason_session_key: Option<String>,
}

impl JsonValidatorPipe {
    /// Creates a validator that only checks well-formedness.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a top-level field.
    #[must_use]
    pub fn with_required_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    /// Stores the failure reason in the session under `key`.
    #[must_use]
    pub fn with_reason_session_key(mut self, key: impl Into<String>) -> Self {
        self.reason_session_key = Some(key.into());
        self
    }

    fn check(&self, text: &str) -> Result<(), String> {
        let value: Value = serde_json::from_str(text).map_err(|e| format!("not well-formed JSON: {e}"))?;
        let Some(object) = value.as_object() else {
            if self.required_fields.is_empty() {
                return Ok(());
            }
            return Err("JSON document is not an object".to_string());
        };
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .filter(|f| !object.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required field(s) [{}]", missing.join(", ")))
        }
    }
}

#[async_trait]
impl Pipe for JsonValidatorPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        message.preserve()?;
        let text = message.as_string_or_empty()?;
        match self.check(&text) {
            Ok(()) => Ok(PipeRunResult::new(message, ctx.success_forward()?)),
            Err(reason) => {
                debug!(pipe = %ctx.pipe_name(), %reason, "Validation failed");
                if let Some(key) = &self.reason_session_key {
                    ctx.session().put(key.clone(), reason.as_str());
                }
                if ctx.has_forward(FAILURE_FORWARD_NAME) {
                    Ok(PipeRunResult::new(message, ctx.forward(FAILURE_FORWARD_NAME)?))
                } else {
                    Err(PipeRunError::pipe_failed(ctx.pipe_name(), reason))
                }
            }
        }
    }
}

/// Direction of a [`JsonWrapperPipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    /// `x` becomes `{"root": x}`.
    Wrap,
    /// `{"root": x}` becomes `x`.
    Unwrap,
}

/// Wraps the message in, or unwraps it from, a single-field JSON object.
#[derive(Debug, Clone)]
pub struct JsonWrapperPipe {
    mode: WrapMode,
    root: String,
}

impl JsonWrapperPipe {
    /// Creates a wrapper using `root` as the field name.
    #[must_use]
    pub fn new(mode: WrapMode, root: impl Into<String>) -> Self {
        Self {
            mode,
            root: root.into(),
        }
    }

    /// Shorthand for [`WrapMode::Wrap`].
    #[must_use]
    pub fn wrap(root: impl Into<String>) -> Self {
        Self::new(WrapMode::Wrap, root)
    }

    /// Shorthand for [`WrapMode::Unwrap`].
    #[must_use]
    pub fn unwrap_root(root: impl Into<String>) -> Self {
        Self::new(WrapMode::Unwrap, root)
    }
}

#[async_trait]
impl Pipe for JsonWrapperPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        let text = message.as_string_or_empty()?;
        let output = match self.mode {
            WrapMode::Wrap => {
                let inner = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
                let mut object = Map::new();
                object.insert(self.root.clone(), inner);
                Value::Object(object).to_string()
            }
            WrapMode::Unwrap => {
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    PipeRunError::pipe_failed_with(ctx.pipe_name(), "cannot unwrap a message that is not JSON", e)
                })?;
                match value.get(&self.root) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => {
                        return Err(PipeRunError::pipe_failed(
                            ctx.pipe_name(),
                            format!("root field [{}] not found", self.root),
                        ))
                    }
                }
            }
        };
        let output = Message::text(output).with_context(MessageContext::new().with_mime_type("application/json"));
        Ok(PipeRunResult::new(output, ctx.success_forward()?))
    }
}
