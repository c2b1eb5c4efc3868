//! Collector for configuration-time warnings.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A warning raised while assembling a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationWarning {
    /// Component the warning is about.
    pub source: String,
    /// Warning text.
    pub message: String,
}

/// Warnings collected while configuring, owned by whoever drives configuration.
///
/// Shared by reference with every builder call that can warn.
#[derive(Debug, Default)]
pub struct ConfigurationWarnings {
    warnings: Mutex<Vec<ConfigurationWarning>>,
}

impl ConfigurationWarnings {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and logs a warning.
    pub fn add(&self, source: impl Into<String>, message: impl Into<String>) {
        let warning = ConfigurationWarning {
            source: source.into(),
            message: message.into(),
        };
        warn!(source = %warning.source, "{}", warning.message);
        self.warnings.lock().push(warning);
    }

    /// Returns all warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigurationWarning> {
        self.warnings.lock().clone()
    }

    /// Returns warnings about one component.
    #[must_use]
    pub fn warnings_for(&self, source: &str) -> Vec<ConfigurationWarning> {
        self.warnings
            .lock()
            .iter()
            .filter(|w| w.source == source)
            .cloned()
            .collect()
    }

    /// Number of warnings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.warnings.lock().len()
    }

    /// Returns true when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_per_source() {
        let warnings = ConfigurationWarnings::new();
        assert!(warnings.is_empty());
        warnings.add("orders", "exit code 0 used twice");
        warnings.add("billing", "locker and max_threads both set");

        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings.warnings_for("orders").len(), 1);
        assert_eq!(warnings.warnings()[1].source, "billing");
    }
}
