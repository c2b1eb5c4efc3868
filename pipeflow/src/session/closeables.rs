//! Registry of resources a session closes when it ends.

use crate::message::Closeable;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

struct ScheduledClose {
    id: usize,
    resource: Arc<dyn Closeable>,
}

/// Resources scheduled for close, kept in registration order and
/// deduplicated by identity.
///
/// Identities handed to another registry with [`CloseRegistry::transfer`]
/// are remembered, so the new owner stays the only one to close them.
#[derive(Default)]
pub struct CloseRegistry {
    entries: Mutex<Vec<ScheduledClose>>,
    transferred: Mutex<HashSet<usize>>,
}

impl CloseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a resource. Returns false if it was already scheduled.
    pub fn schedule(&self, resource: Arc<dyn Closeable>) -> bool {
        let id = resource.resource_id();
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.id == id) {
            return false;
        }
        entries.push(ScheduledClose { id, resource });
        true
    }

    /// Removes a resource from the schedule, returning it if it was there.
    pub fn unschedule(&self, id: usize) -> Option<Arc<dyn Closeable>> {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(pos).resource)
    }

    /// Moves a scheduled resource to `other`. Returns false if it was not
    /// scheduled here.
    pub fn transfer(&self, id: usize, other: &Self) -> bool {
        let Some(resource) = self.unschedule(id) else {
            return false;
        };
        self.transferred.lock().insert(id);
        other.schedule(resource);
        true
    }

    /// Returns true if this registry handed the identity to another one.
    #[must_use]
    pub fn was_transferred(&self, id: usize) -> bool {
        self.transferred.lock().contains(&id)
    }

    /// Returns true if a resource with this identity is scheduled.
    #[must_use]
    pub fn is_scheduled(&self, id: usize) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    /// Returns the number of scheduled resources.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Closes every scheduled resource once, in registration order.
    ///
    /// Failures (errors and panics) are collected and logged; they never stop
    /// the remaining closes. The registry is empty afterwards.
    pub fn close_all(&self) -> Vec<(String, String)> {
        let entries: Vec<ScheduledClose> = std::mem::take(&mut *self.entries.lock());
        let mut failures = Vec::new();

        for entry in entries {
            let name = entry.resource.describe();
            if entry.resource.is_system_managed() {
                debug!(resource = %name, "Skipping close of system-managed resource");
                continue;
            }

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                entry.resource.close()
            }));

            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    let msg = format!("Close failed: {err:#}");
                    warn!("{}: {}", name, msg);
                    failures.push((name, msg));
                }
                Err(panic) => {
                    let msg = format!("Close panicked: {panic:?}");
                    warn!("{}: {}", name, msg);
                    failures.push((name, msg));
                }
            }
        }

        failures
    }
}

impl std::fmt::Debug for CloseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FnCloseable, SystemManaged};
    use parking_lot::RwLock;

    fn recording(label: &str, order: &Arc<RwLock<Vec<String>>>) -> Arc<dyn Closeable> {
        let order = order.clone();
        let name = label.to_string();
        Arc::new(FnCloseable::new(label, move || {
            order.write().push(name.clone());
            Ok(())
        }))
    }

    #[test]
    fn test_schedule_is_idempotent() {
        let registry = CloseRegistry::new();
        let res: Arc<dyn Closeable> = Arc::new(FnCloseable::new("a", || Ok(())));
        assert!(registry.schedule(res.clone()));
        assert!(!registry.schedule(res));
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn test_close_in_registration_order() {
        let registry = CloseRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        registry.schedule(recording("first", &order));
        registry.schedule(recording("second", &order));
        registry.schedule(recording("third", &order));

        assert!(registry.close_all().is_empty());
        assert_eq!(*order.read(), vec!["first", "second", "third"]);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_continues_past_failures() {
        let registry = CloseRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        registry.schedule(recording("first", &order));
        registry.schedule(Arc::new(FnCloseable::new("broken", || anyhow::bail!("boom"))));
        registry.schedule(Arc::new(FnCloseable::new("panics", || panic!("Intentional"))));
        registry.schedule(recording("last", &order));

        let failures = registry.close_all();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(*order.read(), vec!["first", "last"]);
    }

    #[test]
    fn test_system_managed_skipped() {
        let registry = CloseRegistry::new();
        let pooled = Arc::new(FnCloseable::new("pooled", || Ok(())));
        registry.schedule(Arc::new(SystemManaged(pooled.clone())));
        registry.close_all();
        assert!(!pooled.is_closed());
    }

    #[test]
    fn test_unschedule() {
        let registry = CloseRegistry::new();
        let res: Arc<dyn Closeable> = Arc::new(FnCloseable::new("a", || Ok(())));
        registry.schedule(res.clone());
        assert!(registry.is_scheduled(res.resource_id()));
        assert!(registry.unschedule(res.resource_id()).is_some());
        assert!(!registry.is_scheduled(res.resource_id()));
        assert!(registry.unschedule(res.resource_id()).is_none());
    }

    #[test]
    fn test_transfer_moves_and_remembers() {
        let source = CloseRegistry::new();
        let dest = CloseRegistry::new();
        let res: Arc<dyn Closeable> = Arc::new(FnCloseable::new("a", || Ok(())));
        let id = res.resource_id();
        source.schedule(res);

        assert!(source.transfer(id, &dest));
        assert!(!source.is_scheduled(id) && dest.is_scheduled(id));
        assert!(source.was_transferred(id));
        assert!(!source.transfer(id, &dest));
    }
}
