//! Pipe specifications.

use crate::cache::Cache;
use crate::concurrency::LazyThrottle;
use crate::core::{PipeForward, SUCCESS_FORWARD_NAME};
use crate::errors::{ConfigurationError, ErrorInfo};
use crate::locking::{LockBusyPolicy, Locker};
use crate::pipes::Pipe;
use crate::transaction::TransactionAttributes;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A pipe as placed in a pipeline: the implementation plus everything the
/// processor chain applies around it.
#[derive(Debug)]
pub struct PipeSpec {
    /// Unique name within the pipeline.
    pub name: String,
    /// The implementation.
    pub pipe: Arc<dyn Pipe>,
    /// Declared forwards by name.
    pub forwards: HashMap<String, PipeForward>,
    /// Concurrency limit; zero or less means unlimited.
    pub max_threads: i32,
    /// Lock held while the pipe runs.
    pub locker: Option<Arc<dyn Locker>>,
    /// Overrides the engine default for a busy lock.
    pub lock_busy_policy: Option<LockBusyPolicy>,
    /// Transaction propagation and timeout.
    pub transaction: TransactionAttributes,
    /// Values matching this pattern are masked in logs while the pipe runs.
    pub hide_regex: Option<Regex>,
    /// Runs longer than this are reported.
    pub duration_threshold: Option<Duration>,
    /// Result cache.
    pub cache: Option<Arc<dyn Cache>>,
    /// Take the input from this session key instead of the incoming message.
    pub input_session_key: Option<String>,
    /// Use this text as input instead of the incoming message.
    pub input_fixed_value: Option<String>,
    /// Store the result under this session key and pass the input on.
    pub result_session_key: Option<String>,
    /// Pass the incoming message on instead of the result.
    pub preserve_input: bool,
    /// Do not call the pipe for empty input; take `success` directly.
    pub skip_on_empty_input: bool,
    pub(crate) throttle: LazyThrottle,
}

impl PipeSpec {
    /// Creates a specification with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, pipe: Arc<dyn Pipe>) -> Self {
        Self {
            name: name.into(),
            pipe,
            forwards: HashMap::new(),
            max_threads: 0,
            locker: None,
            lock_busy_policy: None,
            transaction: TransactionAttributes::default(),
            hide_regex: None,
            duration_threshold: None,
            cache: None,
            input_session_key: None,
            input_fixed_value: None,
            result_session_key: None,
            preserve_input: false,
            skip_on_empty_input: false,
            throttle: LazyThrottle::default(),
        }
    }

    /// Declares a forward, replacing one with the same name.
    #[must_use]
    pub fn with_forward(mut self, forward: PipeForward) -> Self {
        self.forwards.insert(forward.name.clone(), forward);
        self
    }

    /// Limits concurrent invocations.
    #[must_use]
    pub const fn with_max_threads(mut self, max: i32) -> Self {
        self.max_threads = max;
        self
    }

    /// Holds a lock around every invocation.
    #[must_use]
    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Sets what happens when the lock is busy.
    #[must_use]
    pub const fn with_lock_busy_policy(mut self, policy: LockBusyPolicy) -> Self {
        self.lock_busy_policy = Some(policy);
        self
    }

    /// Sets transaction attributes.
    #[must_use]
    pub const fn with_transaction(mut self, attributes: TransactionAttributes) -> Self {
        self.transaction = attributes;
        self
    }

    /// Masks matches of `regex` in logs while the pipe runs.
    #[must_use]
    pub fn with_hide_regex(mut self, regex: Regex) -> Self {
        self.hide_regex = Some(regex);
        self
    }

    /// Reports runs longer than `threshold`.
    #[must_use]
    pub const fn with_duration_threshold(mut self, threshold: Duration) -> Self {
        self.duration_threshold = Some(threshold);
        self
    }

    /// Caches successful results.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reads the input from a session key.
    #[must_use]
    pub fn with_input_session_key(mut self, key: impl Into<String>) -> Self {
        self.input_session_key = Some(key.into());
        self
    }

    /// Uses a fixed input text.
    #[must_use]
    pub fn with_input_fixed_value(mut self, value: impl Into<String>) -> Self {
        self.input_fixed_value = Some(value.into());
        self
    }

    /// Stores the result in a session key.
    #[must_use]
    pub fn with_result_session_key(mut self, key: impl Into<String>) -> Self {
        self.result_session_key = Some(key.into());
        self
    }

    /// Passes the incoming message on instead of the result.
    #[must_use]
    pub const fn with_preserve_input(mut self) -> Self {
        self.preserve_input = true;
        self
    }

    /// Skips the pipe for empty input.
    #[must_use]
    pub const fn with_skip_on_empty_input(mut self) -> Self {
        self.skip_on_empty_input = true;
        self
    }

    /// Returns true if a `success` forward is declared.
    #[must_use]
    pub fn has_success_forward(&self) -> bool {
        self.forwards.contains_key(SUCCESS_FORWARD_NAME)
    }

    /// Validates the specification on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or a forward has an empty path.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::new("Pipe name cannot be empty")
                .with_error_info(ErrorInfo::new("CONFIG-007-UNNAMED_PIPE", "Pipe has no name")));
        }
        for forward in self.forwards.values() {
            if forward.path.trim().is_empty() {
                return Err(ConfigurationError::new(format!(
                    "Forward [{}] of pipe [{}] has an empty path",
                    forward.name, self.name
                ))
                .with_pipes(vec![self.name.clone()])
                .with_error_info(ErrorInfo::new(
                    "CONFIG-006-EMPTY_PATH",
                    format!("Forward '{}' has no target", forward.name),
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::EchoPipe;

    #[test]
    fn test_spec_defaults() {
        let spec = PipeSpec::new("echo", Arc::new(EchoPipe));
        assert_eq!(spec.max_threads, 0);
        assert!(spec.transaction.is_passthrough());
        assert!(!spec.has_success_forward());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_with_forward_replaces_same_name() {
        let spec = PipeSpec::new("echo", Arc::new(EchoPipe))
            .with_forward(PipeForward::success("a"))
            .with_forward(PipeForward::success("b"));
        assert_eq!(spec.forwards.len(), 1);
        assert_eq!(spec.forwards["success"].path, "b");
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let err = PipeSpec::new("  ", Arc::new(EchoPipe)).validate().unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-007-UNNAMED_PIPE"));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let err = PipeSpec::new("p", Arc::new(EchoPipe))
            .with_forward(PipeForward::new("failure", ""))
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-006-EMPTY_PATH"));
        assert_eq!(err.pipes, vec!["p".to_string()]);
    }
}
