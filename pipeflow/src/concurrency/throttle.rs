//! Counting-permit throttle.

use crate::errors::PipeRunError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace};

/// Limits how many executions of one pipe or pipeline run at once.
///
/// Unlimited owners have no throttle at all; see [`ConcurrencyThrottle::for_limit`].
#[derive(Debug)]
pub struct ConcurrencyThrottle {
    owner: String,
    max_concurrent: usize,
    semaphore: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyThrottle {
    /// Creates a throttle for a positive limit, or `None` for `max_concurrent <= 0`.
    #[must_use]
    pub fn for_limit(owner: impl Into<String>, max_concurrent: i32) -> Option<Arc<Self>> {
        let max = usize::try_from(max_concurrent).ok().filter(|m| *m > 0)?;
        Some(Arc::new(Self {
            owner: owner.into(),
            max_concurrent: max,
            semaphore: Semaphore::new(max),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }))
    }

    /// Owner name.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Configured limit.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits currently free.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Executions currently holding a permit.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous permit holders seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Waits for a permit.
    ///
    /// Fails with an interruption error if the throttle is closed while
    /// waiting or before the call.
    pub async fn acquire(&self) -> Result<ThrottlePermit<'_>, PipeRunError> {
        let started = Instant::now();
        let permit = self.semaphore.acquire().await.map_err(|_| {
            PipeRunError::interrupted(&self.owner, "closed while waiting for a concurrency permit")
        })?;
        let waited = started.elapsed();

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        trace!(
            owner = %self.owner,
            active = now_active,
            waited_ms = waited.as_millis() as u64,
            "Acquired concurrency permit"
        );

        Ok(ThrottlePermit {
            throttle: self,
            _permit: permit,
            waited,
        })
    }

    /// Closes the throttle; pending and future acquires fail.
    pub fn close(&self) {
        debug!(owner = %self.owner, "Closing concurrency throttle");
        self.semaphore.close();
    }
}

/// A held permit; released when dropped or by [`ThrottlePermit::release`].
#[derive(Debug)]
pub struct ThrottlePermit<'a> {
    throttle: &'a ConcurrencyThrottle,
    _permit: SemaphorePermit<'a>,
    waited: Duration,
}

impl ThrottlePermit<'_> {
    /// Time spent waiting for the permit.
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }

    /// Returns the permit.
    pub fn release(self) {}
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.throttle.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A throttle created on first use and kept for the owner's lifetime.
#[derive(Debug, Default)]
pub struct LazyThrottle {
    cell: OnceLock<Option<Arc<ConcurrencyThrottle>>>,
}

impl LazyThrottle {
    /// Creates an uninitialised slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the throttle, creating it on the first call.
    ///
    /// Later calls ignore their arguments.
    pub fn get_or_init(&self, owner: &str, max_concurrent: i32) -> Option<&Arc<ConcurrencyThrottle>> {
        self.cell
            .get_or_init(|| ConcurrencyThrottle::for_limit(owner, max_concurrent))
            .as_ref()
    }

    /// Returns the throttle if it was created.
    #[must_use]
    pub fn get(&self) -> Option<&Arc<ConcurrencyThrottle>> {
        self.cell.get().and_then(Option::as_ref)
    }

    /// Closes the throttle if it was created.
    pub fn close(&self) {
        if let Some(throttle) = self.get() {
            throttle.close();
        }
    }
}
