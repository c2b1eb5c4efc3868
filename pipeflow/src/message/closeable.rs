//! Resources whose lifetime a session manages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A resource that must be closed when its owning session closes.
pub trait Closeable: Send + Sync {
    /// Closes the resource.
    fn close(&self) -> anyhow::Result<()>;

    /// Identity used to deduplicate scheduling.
    ///
    /// Defaults to the address of the value, which is stable for values held
    /// behind an `Arc`. Handle types that share state override this.
    fn resource_id(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }

    /// Resources owned by something outside the session (a pooled
    /// connection, say) return true and are never closed by the session.
    fn is_system_managed(&self) -> bool {
        false
    }

    /// Short description for logs.
    fn describe(&self) -> String {
        "resource".to_string()
    }
}

/// A closeable backed by a closure. Runs the closure at most once.
pub struct FnCloseable {
    label: String,
    closed: AtomicBool,
    on_close: Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>,
}

impl FnCloseable {
    /// Creates a closeable that runs `on_close` when closed.
    pub fn new<F>(label: impl Into<String>, on_close: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            closed: AtomicBool::new(false),
            on_close: Box::new(on_close),
        }
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FnCloseable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCloseable")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Closeable for FnCloseable {
    fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        (self.on_close)()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Marks a resource as owned outside the session.
pub struct SystemManaged(pub Arc<dyn Closeable>);

impl Closeable for SystemManaged {
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn resource_id(&self) -> usize {
        self.0.resource_id()
    }

    fn is_system_managed(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("system-managed {}", self.0.describe())
    }
}
