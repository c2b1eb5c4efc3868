//! Values stored in a session.

use crate::message::{Closeable, Message};
use crate::utils::Timestamp;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value in the session context map.
#[derive(Clone)]
pub enum SessionValue {
    /// Plain data.
    Value(serde_json::Value),
    /// A message; closeable unless text-backed.
    Message(Message),
    /// A resource closed with the session.
    Resource(Arc<dyn Closeable>),
    /// Any other shared object.
    Object(Arc<dyn Any + Send + Sync>),
}

impl SessionValue {
    /// Returns the value as text, when it has a textual form.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Value(serde_json::Value::String(s)) => Some(s.clone()),
            Self::Value(serde_json::Value::Null) => None,
            Self::Value(other) => Some(other.to_string()),
            Self::Message(m) => m.as_string().ok().flatten(),
            Self::Resource(_) | Self::Object(_) => None,
        }
    }

    /// Returns the JSON value, if this is plain data.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the message, converting plain text data into one.
    #[must_use]
    pub fn as_message(&self) -> Option<Message> {
        match self {
            Self::Message(m) => Some(m.clone()),
            Self::Value(serde_json::Value::Null) => Some(Message::null()),
            Self::Value(serde_json::Value::String(s)) => Some(Message::text(s.clone())),
            Self::Value(other) => Some(Message::text(other.to_string())),
            Self::Resource(_) | Self::Object(_) => None,
        }
    }

    /// Returns the value as a closeable resource, if it is one.
    #[must_use]
    pub fn closeable(&self) -> Option<Arc<dyn Closeable>> {
        match self {
            Self::Message(m) => Some(Arc::new(m.clone())),
            Self::Resource(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Returns true when storing this value should schedule it for close.
    ///
    /// Text-backed messages hold no resource and are not scheduled.
    #[must_use]
    pub fn requires_close(&self) -> bool {
        match self {
            Self::Message(m) => !m.is_text() && !m.is_null(),
            Self::Resource(_) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Self::Resource(r) => f.debug_tuple("Resource").field(&r.describe()).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<serde_json::Value> for SessionValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        Self::Value(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        Self::Value(serde_json::Value::String(value))
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        Self::Value(serde_json::Value::Bool(value))
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        Self::Value(serde_json::Value::from(value))
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        Self::Value(serde_json::Value::from(value))
    }
}

impl From<Timestamp> for SessionValue {
    fn from(value: Timestamp) -> Self {
        Self::Value(serde_json::Value::String(crate::utils::timestamps::format_timestamp(
            &value,
        )))
    }
}

impl From<Message> for SessionValue {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

impl From<Arc<dyn Closeable>> for SessionValue {
    fn from(value: Arc<dyn Closeable>) -> Self {
        Self::Resource(value)
    }
}
