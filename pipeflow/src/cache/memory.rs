//! TTL cache held in memory.

use super::Cache;
use crate::errors::{ConfigurationError, ErrorInfo, PipeRunError};
use crate::message::Message;
use crate::session::Session;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::debug;

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

/// Settings of an [`InMemoryCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache name.
    pub name: String,
    /// Entry lifetime in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Entry limit; the oldest entry is evicted when full.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Take the key input from this session key instead of the message.
    #[serde(default)]
    pub key_session_key: Option<String>,
    /// Regex whose first capture group (or whole match) becomes the key.
    #[serde(default)]
    pub key_pattern: Option<String>,
    /// Store keys as SHA-256 hex digests.
    #[serde(default)]
    pub hash_keys: bool,
    /// Cache under an empty key instead of skipping the cache.
    #[serde(default)]
    pub cache_empty_keys: bool,
}

impl CacheConfig {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            key_session_key: None,
            key_pattern: None,
            hash_keys: false,
            cache_empty_keys: false,
        }
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// Takes the key from a session value.
    #[must_use]
    pub fn with_key_session_key(mut self, key: impl Into<String>) -> Self {
        self.key_session_key = Some(key.into());
        self
    }

    /// Extracts the key with a regex.
    #[must_use]
    pub fn with_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    /// Hashes keys.
    #[must_use]
    pub const fn with_hashed_keys(mut self) -> Self {
        self.hash_keys = true;
        self
    }
}

struct CacheEntry {
    value: String,
    created_at: Instant,
}

/// In-memory cache with per-entry TTL.
pub struct InMemoryCache {
    config: CacheConfig,
    key_regex: Option<Regex>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl InMemoryCache {
    /// Creates a cache, compiling the key pattern.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigurationError> {
        let key_regex = config
            .key_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| {
                ConfigurationError::new(format!("Cache [{}] has an invalid key pattern: {err}", config.name))
                    .with_error_info(ErrorInfo::new("CONFIG-008-PARSE", "Invalid cache key pattern"))
            })?;
        let ttl = Duration::from_secs(config.ttl_secs);
        Ok(Self {
            config,
            key_regex,
            entries: DashMap::new(),
            ttl,
        })
    }

    /// Number of live and expired entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("name", &self.config.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Cache for InMemoryCache {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.created_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            // Expired
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    fn put(&self, key: String, value: String) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    fn transform_key(&self, message: &Message, session: &Session) -> Result<Option<String>, PipeRunError> {
        let raw = match &self.config.key_session_key {
            Some(session_key) => session.get_string(session_key),
            None => {
                message.preserve()?;
                message.as_string()?
            }
        };
        let mut key = raw.unwrap_or_default();

        if let Some(regex) = &self.key_regex {
            key = regex
                .captures(&key)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
        }

        if key.is_empty() && !self.config.cache_empty_keys {
            debug!(cache = %self.config.name, "Empty cache key, skipping cache");
            return Ok(None);
        }

        if self.config.hash_keys {
            key = hex::encode(Sha256::digest(key.as_bytes()));
        }
        Ok(Some(key))
    }

    fn transform_value(&self, message: &Message, _session: &Session) -> Result<Option<String>, PipeRunError> {
        message.preserve()?;
        Ok(message.as_string()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put() {
        let cache = InMemoryCache::new(CacheConfig::new("c")).unwrap();
        assert!(cache.get("k").is_none());
        cache.put("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_expiry() {
        let cache = InMemoryCache::new(CacheConfig::new("c").with_ttl(Duration::ZERO)).unwrap();
        cache.put("k".to_string(), "v".to_string());
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_when_full() {
        let mut config = CacheConfig::new("c");
        config.max_entries = 2;
        let cache = InMemoryCache::new(config).unwrap();
        cache.put("a".to_string(), "1".to_string());
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b".to_string(), "2".to_string());
        cache.put("c".to_string(), "3".to_string());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_key_from_message_and_pattern() {
        let cache = InMemoryCache::new(CacheConfig::new("c").with_key_pattern(r"id=(\d+)")).unwrap();
        let session = Session::new();
        let key = cache.transform_key(&Message::text("order id=42"), &session).unwrap();
        assert_eq!(key.as_deref(), Some("42"));
        let none = cache.transform_key(&Message::text("no id here"), &session).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_key_from_session_hashed() {
        let cache = InMemoryCache::new(
            CacheConfig::new("c").with_key_session_key("customer").with_hashed_keys(),
        )
        .unwrap();
        let session = Session::new();
        session.put("customer", "alice");
        let key = cache.transform_key(&Message::null(), &session).unwrap().unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(key, hex::encode(Sha256::digest(b"alice")));
    }

    #[test]
    fn test_stream_key_keeps_message_readable() {
        let cache = InMemoryCache::new(CacheConfig::new("c")).unwrap();
        let msg = Message::stream(std::io::Cursor::new(b"payload".to_vec()));
        let key = cache.transform_key(&msg, &Session::new()).unwrap();
        assert_eq!(key.as_deref(), Some("payload"));
        assert_eq!(msg.as_string().unwrap().as_deref(), Some("payload"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(InMemoryCache::new(CacheConfig::new("c").with_key_pattern("(")).is_err());
    }
}
