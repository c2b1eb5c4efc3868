//! Per-message session: context values plus resource lifecycle.
//!
//! A [`Session`] is created by whoever receives a message, threaded through
//! the engine and every chain step, and closed by that same caller. The
//! context map is a concurrent map so a session may be shared with a
//! concurrently dispatched sub-invocation; higher-level operations such as
//! [`Session::merge_into`] are not atomic across the whole key set.
//!
//! The session also carries the active log-masking patterns as an explicit
//! stack. Callers push patterns for the duration of a nested call with
//! [`Session::hide_scope`] and the scope pops them when dropped.

mod closeables;
mod value;


pub use closeables::CloseRegistry;
pub use value::SessionValue;

use crate::core::ExitState;
use crate::message::{Closeable, Message};
use crate::utils::{generate_message_id, now_utc, Timestamp};
use chrono::DateTime;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Key of the message id.
pub const MESSAGE_ID_KEY: &str = "mid";
/// Key of the correlation id.
pub const CORRELATION_ID_KEY: &str = "cid";
/// Key of the receive timestamp.
pub const TS_RECEIVED_KEY: &str = "tsReceived";
/// Key of the send timestamp.
pub const TS_SENT_KEY: &str = "tsSent";
/// Key of the final exit state.
pub const EXIT_STATE_KEY: &str = "exitState";
/// Key of the final exit code.
pub const EXIT_CODE_KEY: &str = "exitCode";
/// Key of the message the pipeline was invoked with.
pub const ORIGINAL_MESSAGE_KEY: &str = "originalMessage";
/// Keys with this prefix hold system-managed values and are never
/// scheduled for close automatically.
pub const SYSTEM_MANAGED_RESOURCE_PREFIX: &str = "__";
/// Key marking all keys in a merge key list.
pub const ALL_KEYS: &str = "*";

/// Scope tag of hide patterns a child session inherits.
const INHERITED_SCOPE: u64 = 0;

/// Per-invocation context and resource-lifecycle container.
pub struct Session {
    values: DashMap<String, SessionValue>,
    closeables: CloseRegistry,
    hide_patterns: RwLock<Vec<(u64, Regex)>>,
    next_scope: AtomicU64,
    depth: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            closeables: CloseRegistry::new(),
            hide_patterns: RwLock::new(Vec::new()),
            next_scope: AtomicU64::new(0),
            depth: 0,
        }
    }

    /// Creates a session populated the way a listener populates it.
    ///
    /// A missing message id is generated; the correlation id defaults to the
    /// message id.
    #[must_use]
    pub fn for_message(message_id: Option<&str>, correlation_id: Option<&str>) -> Self {
        let session = Self::new();
        let mid = message_id.map_or_else(generate_message_id, String::from);
        let cid = correlation_id.map_or_else(|| mid.clone(), String::from);
        session.put(MESSAGE_ID_KEY, mid);
        session.put(CORRELATION_ID_KEY, cid);
        session.put(TS_RECEIVED_KEY, now_utc());
        session
    }

    /// Creates a child session for a nested pipeline call.
    ///
    /// The child gets a fresh message id, the parent's correlation id, a copy
    /// of the parent's active hide patterns and a depth one deeper.
    #[must_use]
    pub fn child_of(parent: &Self) -> Self {
        let mut child = Self::for_message(None, parent.correlation_id().as_deref());
        child.depth = parent.depth + 1;
        *child.hide_patterns.write() = parent.hide_patterns().into_iter().map(|p| (INHERITED_SCOPE, p)).collect();
        child
    }

    /// Nesting depth; zero for a top-level session.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Stores a value, returning the previous one.
    ///
    /// Closeable values are scheduled for close with the session unless the
    /// key is system-managed or the value is a text-backed message.
    pub fn put(&self, key: impl Into<String>, value: impl Into<SessionValue>) -> Option<SessionValue> {
        let key = key.into();
        let value = value.into();
        if !key.starts_with(SYSTEM_MANAGED_RESOURCE_PREFIX) && value.requires_close() {
            if let Some(resource) = value.closeable() {
                self.closeables.schedule(resource);
            }
        }
        self.values.insert(key, value)
    }

    /// Stores a value only if the key is absent. Returns true if stored.
    pub fn put_if_absent(&self, key: &str, value: impl Into<SessionValue>) -> bool {
        if self.values.contains_key(key) {
            return false;
        }
        self.put(key, value);
        true
    }

    /// Stores a shared object that has no textual form.
    pub fn put_object<T: Any + Send + Sync>(&self, key: impl Into<String>, object: Arc<T>) {
        self.values.insert(key.into(), SessionValue::Object(object));
    }

    /// Returns a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<SessionValue> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Removes a value. Close scheduling is not affected.
    pub fn remove(&self, key: &str) -> Option<SessionValue> {
        self.values.remove(key).map(|(_, v)| v)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a value as text.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_string())
    }

    /// Returns a value as a message.
    #[must_use]
    pub fn get_message(&self, key: &str) -> Option<Message> {
        self.get(key).and_then(|v| v.as_message())
    }

    /// Returns a boolean value, parsing text; `default` when absent or unparsable.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(SessionValue::Value(serde_json::Value::Bool(b))) => b,
            Some(other) => other
                .as_string()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default),
            None => default,
        }
    }

    /// Returns an integer value, parsing text; `default` when absent or unparsable.
    #[must_use]
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(SessionValue::Value(serde_json::Value::Number(n))) => n.as_i64().unwrap_or(default),
            Some(other) => other
                .as_string()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default),
            None => default,
        }
    }

    /// Returns a shared object of the requested type.
    #[must_use]
    pub fn get_object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.get(key) {
            Some(SessionValue::Object(obj)) => obj.downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Message id of the message being processed.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.get_string(MESSAGE_ID_KEY)
    }

    /// Correlation id of the message being processed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<String> {
        self.get_string(CORRELATION_ID_KEY)
    }

    /// Time the message was received.
    #[must_use]
    pub fn ts_received(&self) -> Option<Timestamp> {
        self.get_timestamp(TS_RECEIVED_KEY)
    }

    /// Time the message was sent by its producer.
    #[must_use]
    pub fn ts_sent(&self) -> Option<Timestamp> {
        self.get_timestamp(TS_SENT_KEY)
    }

    fn get_timestamp(&self, key: &str) -> Option<Timestamp> {
        let raw = self.get_string(key)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|ts| ts.with_timezone(&chrono::Utc))
    }

    /// Records the final exit state and code.
    pub fn set_exit_state(&self, state: ExitState, exit_code: i32) {
        self.put(EXIT_STATE_KEY, state.as_str());
        self.put(EXIT_CODE_KEY, exit_code);
    }

    /// Returns the recorded exit state.
    #[must_use]
    pub fn exit_state(&self) -> Option<ExitState> {
        self.get_string(EXIT_STATE_KEY).and_then(|s| s.parse().ok())
    }

    /// Schedules a resource for close with the session.
    ///
    /// Returns false if the same resource was already scheduled.
    pub fn schedule_close(&self, resource: Arc<dyn Closeable>) -> bool {
        self.closeables.schedule(resource)
    }

    /// Schedules a message for close with the session.
    pub fn schedule_message_close(&self, message: &Message) -> bool {
        self.closeables.schedule(Arc::new(message.clone()))
    }

    /// Removes a resource from the close schedule. Returns true if it was scheduled.
    pub fn unschedule(&self, resource: &dyn Closeable) -> bool {
        self.closeables.unschedule(resource.resource_id()).is_some()
    }

    /// Returns true if the resource is scheduled for close.
    #[must_use]
    pub fn is_scheduled(&self, resource: &dyn Closeable) -> bool {
        self.closeables.is_scheduled(resource.resource_id())
    }

    /// Number of resources scheduled for close.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.closeables.pending_count()
    }

    /// Copies values into `other`.
    ///
    /// `keys` is a list separated by `,` or `;`, or `*`/empty for all keys.
    /// When a copied value is scheduled for close in this session, the
    /// scheduling moves to `other`, so it is closed once, by `other`. Other
    /// values are stored with [`put`](Self::put), so `other` adopts a
    /// closeable this session does not own, unless this session already
    /// handed it to another one. The exit state and code are always copied
    /// when present.
    pub fn merge_into(&self, keys: &str, other: &Self) {
        let selected: Vec<String> = if keys.trim().is_empty() || keys.trim() == ALL_KEYS {
            self.keys()
        } else {
            keys.split([',', ';'])
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .chain([EXIT_STATE_KEY.to_string(), EXIT_CODE_KEY.to_string()])
                .collect()
        };

        for key in selected {
            let Some(value) = self.get(&key) else {
                continue;
            };
            debug!(key = %key, "Merging session value into destination session");
            let id = value.closeable().map(|resource| resource.resource_id());
            match id {
                Some(id) if self.closeables.transfer(id, &other.closeables) => {
                    other.values.insert(key, value);
                }
                Some(id) if self.closeables.was_transferred(id) => {
                    other.values.insert(key, value);
                }
                _ => {
                    other.put(key, value);
                }
            }
        }
    }

    /// Pushes hide patterns for the lifetime of the returned scope.
    pub fn hide_scope(&self, patterns: &[Regex]) -> HideScope<'_> {
        let scope = self.next_scope.fetch_add(1, Ordering::Relaxed) + 1;
        self.hide_patterns
            .write()
            .extend(patterns.iter().map(|p| (scope, p.clone())));
        HideScope { session: self, scope }
    }

    /// Returns the active hide patterns, outermost first.
    #[must_use]
    pub fn hide_patterns(&self) -> Vec<Regex> {
        self.hide_patterns.read().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Masks every match of the active hide patterns with `*`.
    #[must_use]
    pub fn mask(&self, text: &str) -> String {
        let patterns = self.hide_patterns.read();
        if patterns.is_empty() {
            return text.to_string();
        }
        let mut masked = text.to_string();
        for (_, pattern) in patterns.iter() {
            masked = pattern
                .replace_all(&masked, |caps: &regex::Captures<'_>| "*".repeat(caps[0].chars().count()))
                .into_owned();
        }
        masked
    }

    /// Closes every scheduled resource once, in registration order.
    ///
    /// Returns the failures, which are also logged. Calling close again is a
    /// no-op for resources already closed.
    pub fn close(&self) -> Vec<(String, String)> {
        self.closeables.close_all()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closeables.pending_count() > 0 {
            self.closeables.close_all();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("keys", &self.keys())
            .field("closeables", &self.closeables)
            .field("hide_patterns", &self.hide_patterns.read().len())
            .field("depth", &self.depth)
            .finish()
    }
}

/// Removes the patterns pushed by [`Session::hide_scope`] when dropped,
/// leaving those of other scopes in place.
pub struct HideScope<'a> {
    session: &'a Session,
    scope: u64,
}

impl Drop for HideScope<'_> {
    fn drop(&mut self) {
        self.session.hide_patterns.write().retain(|(scope, _)| *scope != self.scope);
    }
}
