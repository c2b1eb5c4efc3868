//! Turns a run error into an error-description message.

use super::{BoxError, PipeRunError};
use crate::message::{Message, MessageContext};
use crate::utils::timestamps::format_timestamp;
use crate::utils::{now_utc, Timestamp};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use std::fmt::Debug;
use tracing::warn;

/// Where and for which message an error happened.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    /// Name reported as originator.
    pub originator: &'a str,
    /// Pipeline that was running.
    pub pipeline: &'a str,
    /// Pipe that failed, when known.
    pub pipe: Option<&'a str>,
    /// Message id.
    pub message_id: Option<&'a str>,
    /// When the message was received.
    pub received: Option<Timestamp>,
}

/// Builds the message sent down an `exception` forward.
pub trait ErrorMessageFormatter: Send + Sync + Debug {
    /// Formats the error. May fail; callers fall back to plain text.
    fn format(
        &self,
        error: &PipeRunError,
        original: &Message,
        context: &ErrorContext<'_>,
    ) -> Result<Message, BoxError>;

    /// Formats the error, falling back to its display text if formatting fails.
    fn format_or_fallback(
        &self,
        error: &PipeRunError,
        original: &Message,
        context: &ErrorContext<'_>,
    ) -> Message {
        match self.format(error, original, context) {
            Ok(message) => message,
            Err(format_err) => {
                warn!(
                    pipeline = %context.pipeline,
                    error = %format_err,
                    "Could not format error message, using plain text"
                );
                Message::text(error.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "errorMessage")]
    error_message: ErrorDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDocument<'a> {
    timestamp: String,
    originator: &'a str,
    message: String,
    kind: &'static str,
    location: Location<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
    original_message: OriginalMessage<'a>,
}

#[derive(Serialize)]
struct Location<'a> {
    pipeline: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipe: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OriginalMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    received_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_base64: Option<String>,
}

/// Formats errors as a JSON document.
///
/// Text content of the original message is embedded as-is, binary content as
/// base64. Unreadable content (a consumed stream) is left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorMessageFormatter {
    include_original: bool,
}

impl JsonErrorMessageFormatter {
    /// Creates a formatter that embeds the original message.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            include_original: true,
        }
    }

    /// Creates a formatter that leaves the original message out.
    #[must_use]
    pub const fn without_original() -> Self {
        Self {
            include_original: false,
        }
    }
}

impl ErrorMessageFormatter for JsonErrorMessageFormatter {
    fn format(
        &self,
        error: &PipeRunError,
        original: &Message,
        context: &ErrorContext<'_>,
    ) -> Result<Message, BoxError> {
        let (content, content_base64) = if self.include_original && original.is_repeatable() {
            if original.is_binary() {
                (None, original.as_bytes().ok().flatten().map(|b| BASE64.encode(b)))
            } else {
                (original.as_string().ok().flatten(), None)
            }
        } else {
            (None, None)
        };

        let causes = error.cause_chain().into_iter().skip(1).collect();
        let document = ErrorDocument {
            timestamp: format_timestamp(&now_utc()),
            originator: context.originator,
            message: error.to_string(),
            kind: error.kind(),
            location: Location {
                pipeline: context.pipeline,
                pipe: context.pipe.or_else(|| error.pipe_in_error()),
            },
            causes,
            original_message: OriginalMessage {
                message_id: context.message_id,
                received_time: context.received.as_ref().map(format_timestamp),
                content,
                content_base64,
            },
        };

        let json = serde_json::to_string(&Envelope {
            error_message: document,
        })?;
        Ok(Message::text(json).with_context(MessageContext::new().with_mime_type("application/json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> ErrorContext<'a> {
        ErrorContext {
            originator: "pipeflow",
            pipeline: "orders",
            pipe: Some("store"),
            message_id: Some("m-1"),
            received: None,
        }
    }

    fn parse(message: &Message) -> serde_json::Value {
        serde_json::from_str(&message.as_string().unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_json_document() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "db down");
        let err = PipeRunError::pipe_failed_with("store", "insert failed", io);
        let msg = JsonErrorMessageFormatter::new()
            .format(&err, &Message::text("<order/>"), &ctx())
            .unwrap();
        let doc = parse(&msg);

        assert_eq!(doc["errorMessage"]["originator"], "pipeflow");
        assert_eq!(doc["errorMessage"]["location"]["pipe"], "store");
        assert_eq!(doc["errorMessage"]["causes"][0], "db down");
        assert_eq!(doc["errorMessage"]["originalMessage"]["messageId"], "m-1");
        assert_eq!(doc["errorMessage"]["originalMessage"]["content"], "<order/>");
        assert!(doc["errorMessage"]["timestamp"].is_string());
        assert_eq!(msg.context().mime_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_binary_original_is_base64() {
        let err = PipeRunError::failed("bad");
        let msg = JsonErrorMessageFormatter::new()
            .format(&err, &Message::bytes(vec![0xff, 0x00]), &ctx())
            .unwrap();
        let doc = parse(&msg);
        assert_eq!(doc["errorMessage"]["originalMessage"]["contentBase64"], "/wA=");
    }

    #[test]
    fn test_without_original() {
        let err = PipeRunError::failed("bad");
        let msg = JsonErrorMessageFormatter::without_original()
            .format(&err, &Message::text("secret"), &ctx())
            .unwrap();
        assert!(parse(&msg)["errorMessage"]["originalMessage"]["content"].is_null());
    }

    #[derive(Debug)]
    struct BrokenFormatter;

    impl ErrorMessageFormatter for BrokenFormatter {
        fn format(&self, _: &PipeRunError, _: &Message, _: &ErrorContext<'_>) -> Result<Message, BoxError> {
            Err("formatter broke".into())
        }
    }

    #[test]
    fn test_fallback_to_plain_text() {
        let err = PipeRunError::pipe_failed("a", "boom");
        let msg = BrokenFormatter.format_or_fallback(&err, &Message::null(), &ctx());
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("Pipe [a] boom"));
    }
}
