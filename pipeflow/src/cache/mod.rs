//! Result caching for pipes and pipelines.

mod memory;

pub use memory::{CacheConfig, InMemoryCache};

use crate::errors::PipeRunError;
use crate::message::Message;
use crate::session::Session;
use std::fmt::Debug;

/// A key/value cache consulted by the cache step of the processor chain.
pub trait Cache: Send + Sync + Debug {
    /// Name for logs and events.
    fn name(&self) -> &str;

    /// Returns a cached value.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores a value.
    fn put(&self, key: String, value: String);

    /// Derives the cache key; `None` disables caching for this invocation.
    fn transform_key(&self, message: &Message, session: &Session) -> Result<Option<String>, PipeRunError>;

    /// Derives the value to store from a successful result; `None` stores nothing.
    fn transform_value(&self, message: &Message, session: &Session) -> Result<Option<String>, PipeRunError>;

    /// Called when the owning pipeline starts.
    fn open(&self) {}

    /// Called when the owning pipeline stops.
    fn close(&self) {}
}
