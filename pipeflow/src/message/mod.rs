//! Messages flowing through a pipeline.
//!
//! A [`Message`] is a cheap-to-clone handle: clones share the same content
//! and the same identity, which is what the session uses to deduplicate
//! close scheduling.

mod closeable;

pub use closeable::{Closeable, FnCloseable, SystemManaged};

use crate::errors::MessageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Metadata travelling with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    /// Character set of textual content.
    pub charset: Option<String>,
    /// MIME type of the content.
    pub mime_type: Option<String>,
    /// Free-form headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the charset.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

enum Content {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
    Consumed,
    Closed,
}

impl Content {
    fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Null => Some(Self::Null),
            Self::Text(t) => Some(Self::Text(t.clone())),
            Self::Bytes(b) => Some(Self::Bytes(b.clone())),
            Self::Consumed => Some(Self::Consumed),
            Self::Closed => Some(Self::Closed),
            Self::Stream(_) => None,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Stream(_) => "stream",
            Self::Consumed => "consumed",
            Self::Closed => "closed",
        }
    }
}

struct MessageInner {
    content: Mutex<Content>,
    context: MessageContext,
}

/// A payload backed by text, bytes or a one-shot stream.
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

impl Message {
    fn from_content(content: Content, context: MessageContext) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                content: Mutex::new(content),
                context,
            }),
        }
    }

    /// Creates an absent message.
    #[must_use]
    pub fn null() -> Self {
        Self::from_content(Content::Null, MessageContext::default())
    }

    /// Creates a text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_content(Content::Text(text.into()), MessageContext::default())
    }

    /// Creates a binary message.
    #[must_use]
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_content(Content::Bytes(bytes.into()), MessageContext::default())
    }

    /// Creates a message backed by a stream that can be read once.
    #[must_use]
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::from_content(Content::Stream(Box::new(reader)), MessageContext::default())
    }

    /// Returns a new message with the same content kind and the given context.
    ///
    /// Stream content moves to the new message; the old handle reads as consumed.
    #[must_use]
    pub fn with_context(self, context: MessageContext) -> Self {
        let content = {
            let mut guard = self.inner.content.lock();
            match guard.try_clone() {
                Some(copy) => copy,
                None => std::mem::replace(&mut *guard, Content::Consumed),
            }
        };
        Self::from_content(content, context)
    }

    /// Returns the message metadata.
    #[must_use]
    pub fn context(&self) -> &MessageContext {
        &self.inner.context
    }

    /// Returns true when there is no payload.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(*self.inner.content.lock(), Content::Null)
    }

    /// Returns true when there is no payload or a zero-length one.
    ///
    /// Streams are never considered empty without being read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &*self.inner.content.lock() {
            Content::Null => true,
            Content::Text(t) => t.is_empty(),
            Content::Bytes(b) => b.is_empty(),
            Content::Stream(_) | Content::Consumed | Content::Closed => false,
        }
    }

    /// Returns true when the content can be read more than once.
    #[must_use]
    pub fn is_repeatable(&self) -> bool {
        !matches!(*self.inner.content.lock(), Content::Stream(_))
    }

    /// Returns true for text-backed messages.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(*self.inner.content.lock(), Content::Text(_))
    }

    /// Returns true for binary content (bytes or stream).
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(*self.inner.content.lock(), Content::Bytes(_) | Content::Stream(_))
    }

    /// Returns true once [`Message::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.content.lock(), Content::Closed)
    }

    /// Reads a stream into memory so the content becomes repeatable.
    pub fn preserve(&self) -> Result<(), MessageError> {
        let mut guard = self.inner.content.lock();
        match &mut *guard {
            Content::Stream(reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                *guard = Content::Bytes(buffer);
                Ok(())
            }
            Content::Consumed => Err(MessageError::AlreadyConsumed),
            Content::Closed => Err(MessageError::Closed),
            _ => Ok(()),
        }
    }

    /// Returns the content as bytes. Reading a stream consumes it.
    pub fn as_bytes(&self) -> Result<Option<Vec<u8>>, MessageError> {
        let mut guard = self.inner.content.lock();
        match &mut *guard {
            Content::Null => Ok(None),
            Content::Text(t) => Ok(Some(t.clone().into_bytes())),
            Content::Bytes(b) => Ok(Some(b.clone())),
            Content::Stream(reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                *guard = Content::Consumed;
                Ok(Some(buffer))
            }
            Content::Consumed => Err(MessageError::AlreadyConsumed),
            Content::Closed => Err(MessageError::Closed),
        }
    }

    /// Returns the content as text. Reading a stream consumes it.
    pub fn as_string(&self) -> Result<Option<String>, MessageError> {
        {
            let guard = self.inner.content.lock();
            if let Content::Text(t) = &*guard {
                return Ok(Some(t.clone()));
            }
        }
        match self.as_bytes()? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the content as text, or an empty string when absent.
    pub fn as_string_or_empty(&self) -> Result<String, MessageError> {
        Ok(self.as_string()?.unwrap_or_default())
    }

    /// Returns the content size in bytes, when known without reading.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match &*self.inner.content.lock() {
            Content::Null => Some(0),
            Content::Text(t) => Some(t.len() as u64),
            Content::Bytes(b) => Some(b.len() as u64),
            _ => None,
        }
    }

    /// Releases the content. Further reads fail with [`MessageError::Closed`].
    pub fn close(&self) {
        *self.inner.content.lock() = Content::Closed;
    }

    /// Identity shared by all clones of this message.
    #[must_use]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }

    /// Returns true when both handles refer to the same message.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a short description safe for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        let guard = self.inner.content.lock();
        match &*guard {
            Content::Text(t) => format!("text({} chars)", t.chars().count()),
            Content::Bytes(b) => format!("bytes({} bytes)", b.len()),
            other => other.kind().to_string(),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("content", &self.describe())
            .field("context", &self.inner.context)
            .finish()
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Self::bytes(value)
    }
}

impl Closeable for Message {
    fn close(&self) -> anyhow::Result<()> {
        Self::close(self);
        Ok(())
    }

    fn resource_id(&self) -> usize {
        self.identity()
    }

    fn describe(&self) -> String {
        format!("message {}", Self::describe(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_text_message() {
        let msg = Message::text("hello");
        assert!(!msg.is_null());
        assert!(!msg.is_empty());
        assert!(msg.is_repeatable());
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("hello"));
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("hello"));
        assert_eq!(msg.size(), Some(5));
    }

    #[test]
    fn test_null_and_empty() {
        assert!(Message::null().is_null());
        assert!(Message::null().is_empty());
        assert!(Message::text("").is_empty());
        assert!(!Message::text("").is_null());
        assert_eq!(Message::null().as_string().unwrap(), None);
    }

    #[test]
    fn test_stream_reads_once() {
        let msg = Message::stream(Cursor::new(b"abc".to_vec()));
        assert!(!msg.is_repeatable());
        assert_eq!(msg.size(), None);
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("abc"));
        assert!(matches!(msg.as_string(), Err(MessageError::AlreadyConsumed)));
    }

    #[test]
    fn test_preserve_makes_stream_repeatable() {
        let msg = Message::stream(Cursor::new(b"abc".to_vec()));
        msg.preserve().unwrap();
        assert!(msg.is_repeatable());
        assert_eq!(msg.as_bytes().unwrap(), Some(b"abc".to_vec()));
        assert_eq!(msg.as_bytes().unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_close_blocks_reads() {
        let msg = Message::text("x");
        let clone = msg.clone();
        msg.close();
        assert!(clone.is_closed());
        assert!(matches!(clone.as_string(), Err(MessageError::Closed)));
    }

    #[test]
    fn test_identity_shared_by_clones() {
        let a = Message::text("x");
        let b = a.clone();
        let c = Message::text("x");
        assert_eq!(a.identity(), b.identity());
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert_eq!(Closeable::resource_id(&a), a.identity());
    }

    #[test]
    fn test_invalid_utf8() {
        let msg = Message::bytes(vec![0xff, 0xfe]);
        assert!(matches!(msg.as_string(), Err(MessageError::Encoding(_))));
    }

    #[test]
    fn test_with_context() {
        let msg = Message::text("{}")
            .with_context(MessageContext::new().with_mime_type("application/json"));
        assert_eq!(msg.context().mime_type.as_deref(), Some("application/json"));
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("{}"));
    }
}
