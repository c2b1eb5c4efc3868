//! Lock table shared by in-process lockers.

use super::{LockToken, Locker};
use crate::errors::LockerError;
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn default_retention_secs() -> u64 {
    4 * 60 * 60
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Settings of a [`LocalLocker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockerConfig {
    /// Lock object id; lockers with the same id exclude each other.
    pub object_id: String,
    /// How long a lock is kept before it counts as abandoned.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Extra attempts after the first one fails.
    #[serde(default)]
    pub num_retries: u32,
    /// Delay between attempts in milliseconds, jittered by up to 20%.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl LockerConfig {
    /// Creates settings for a lock object id.
    #[must_use]
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            retention_secs: default_retention_secs(),
            num_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    /// Sets the retention.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    /// Sets the retry behaviour.
    #[must_use]
    pub const fn with_retries(mut self, num_retries: u32, retry_delay: Duration) -> Self {
        self.num_retries = num_retries;
        self.retry_delay_ms = retry_delay.as_millis() as u64;
        self
    }
}

/// A row of the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Current holder.
    pub holder: Uuid,
    /// When the lock was taken.
    pub acquired_at: Timestamp,
    /// When the lock counts as abandoned.
    pub expires_at: Timestamp,
}

/// Concurrent table of held locks, shared by all lockers in a process.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<String, LockRecord>,
}

impl LockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record unless a live one exists. Expired records are replaced.
    fn try_insert(&self, object_id: &str, holder: Uuid, retention: ChronoDuration) -> bool {
        let now = now_utc();
        let record = LockRecord {
            holder,
            acquired_at: now,
            expires_at: now + retention,
        };
        match self.locks.entry(object_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                true
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    info!(
                        lock = %object_id,
                        previous_holder = %occupied.get().holder,
                        "Replacing expired lock"
                    );
                    occupied.insert(record);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn remove_if_held(&self, object_id: &str, holder: Uuid) -> bool {
        self.locks
            .remove_if(object_id, |_, record| record.holder == holder)
            .is_some()
    }

    /// Returns the record for a lock, if held.
    #[must_use]
    pub fn record(&self, object_id: &str) -> Option<LockRecord> {
        self.locks.get(object_id).map(|r| r.clone())
    }

    /// Number of held locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true when no lock is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A locker backed by a [`LockTable`].
#[derive(Debug, Clone)]
pub struct LocalLocker {
    config: LockerConfig,
    table: Arc<LockTable>,
}

impl LocalLocker {
    /// Creates a locker over a shared table.
    #[must_use]
    pub fn new(config: LockerConfig, table: Arc<LockTable>) -> Self {
        Self { config, table }
    }

    /// Settings.
    #[must_use]
    pub const fn config(&self) -> &LockerConfig {
        &self.config
    }

    fn retry_delay(&self) -> Duration {
        let base = self.config.retry_delay_ms;
        let jitter = if base >= 5 {
            rand::thread_rng().gen_range(0..=base / 5)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

#[async_trait]
impl Locker for LocalLocker {
    fn object_id(&self) -> &str {
        &self.config.object_id
    }

    async fn acquire(&self) -> Result<Option<LockToken>, LockerError> {
        let holder = Uuid::new_v4();
        let retention = ChronoDuration::seconds(
            i64::try_from(self.config.retention_secs).map_err(|_| LockerError::Store {
                lock: self.config.object_id.clone(),
                reason: "retention out of range".to_string(),
            })?,
        );

        for attempt in 0..=self.config.num_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay()).await;
            }
            if self.table.try_insert(&self.config.object_id, holder, retention) {
                debug!(lock = %self.config.object_id, holder = %holder, attempt, "Lock obtained");
                return Ok(Some(LockToken {
                    object_id: self.config.object_id.clone(),
                    holder,
                }));
            }
        }

        debug!(lock = %self.config.object_id, "Lock is held elsewhere");
        Ok(None)
    }

    async fn release(&self, token: LockToken) -> Result<(), LockerError> {
        if self.table.remove_if_held(&token.object_id, token.holder) {
            debug!(lock = %token.object_id, holder = %token.holder, "Lock released");
            Ok(())
        } else {
            warn!(lock = %token.object_id, holder = %token.holder, "Release of a lock not held");
            Err(LockerError::NotHeld {
                lock: token.object_id,
                holder: token.holder.to_string(),
            })
        }
    }
}
