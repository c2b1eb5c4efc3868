//! Named exclusive locks.
//!
//! A [`Locker`] hands out at most one [`LockToken`] per lock object id at a
//! time. `acquire` returning `Ok(None)` means the lock is held elsewhere; the
//! caller decides with a [`LockBusyPolicy`] whether that skips or fails.

mod table;

pub use table::{LocalLocker, LockRecord, LockTable, LockerConfig};

use crate::errors::LockerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// Proof of holding a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// Lock object id.
    pub object_id: String,
    /// Unique id of this holder.
    pub holder: Uuid,
}

/// What to do when a lock is held elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBusyPolicy {
    /// Skip the work and report an empty SUCCESS result.
    Skip,
    /// Fail the run.
    Fail,
}

/// Source of exclusive tokens for one lock object id.
#[async_trait]
pub trait Locker: Send + Sync + Debug {
    /// Lock object id.
    fn object_id(&self) -> &str;

    /// Tries to obtain the lock; `Ok(None)` when it is held elsewhere.
    async fn acquire(&self) -> Result<Option<LockToken>, LockerError>;

    /// Releases a lock obtained by [`Locker::acquire`].
    async fn release(&self, token: LockToken) -> Result<(), LockerError>;
}
