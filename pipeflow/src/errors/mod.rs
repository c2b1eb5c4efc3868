//! Error types for the pipeflow engine.
//!
//! The taxonomy follows how failures are handled at run time:
//!
//! - [`ConfigurationError`]: a pipeline graph that can never run correctly
//!   (unresolved forward, duplicate pipe, missing first pipe). Detected while
//!   building, fatal to any run that still hits it.
//! - [`PipeRunError`]: the run exception. Raised by pipes and chain steps and
//!   propagated to the caller unless a pipe declares an `exception` forward.
//! - [`LockerError`], [`TransactionError`], [`MessageError`]: collaborator
//!   failures, converted into [`PipeRunError`] at the chain boundary.

mod formatter;
mod suggestions;

pub use formatter::{ErrorContext, ErrorMessageFormatter, JsonErrorMessageFormatter};
pub use suggestions::ConfigurationSuggestions;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the source of a run failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for operations outside a single run.
#[derive(Debug, Error)]
pub enum PipeflowError {
    /// The pipeline graph or engine configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A pipeline run failed.
    #[error("{0}")]
    Run(#[from] PipeRunError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diagnostic metadata attached to a configuration error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-004-UNRESOLVED_FORWARD").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info, filling the fix hint from the known suggestions.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        let fix_hint = ConfigurationSuggestions::get(&code).map(String::from);
        Self {
            code,
            summary: summary.into(),
            fix_hint,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }
        map
    }
}

/// Error raised when a pipeline graph is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The pipes involved in the error.
    pub pipes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pipes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the pipes involved.
    #[must_use]
    pub fn with_pipes(mut self, pipes: Vec<String>) -> Self {
        self.pipes = pipes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|i| i.code.as_str())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::Value::String(self.message.clone()));
        map.insert(
            "pipes".to_string(),
            serde_json::Value::Array(
                self.pipes
                    .iter()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .collect(),
            ),
        );
        if let Some(ref info) = self.error_info {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }
}

/// Failure of a [`crate::locking::Locker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockerError {
    /// The backing lock table could not be reached or updated.
    #[error("Lock store error for [{lock}]: {reason}")]
    Store {
        /// Lock object id.
        lock: String,
        /// Failure description.
        reason: String,
    },

    /// A release was attempted with a token that does not hold the lock.
    #[error("Lock [{lock}] is not held by token [{holder}]")]
    NotHeld {
        /// Lock object id.
        lock: String,
        /// Holder id of the presented token.
        holder: String,
    },
}

/// Failure of a [`crate::transaction::TransactionManager`] or of propagation rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// A transaction could not be started.
    #[error("Could not begin transaction [{name}]: {reason}")]
    Begin {
        /// Transaction name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// Commit failed.
    #[error("Could not commit transaction [{name}]: {reason}")]
    Commit {
        /// Transaction name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// Rollback failed.
    #[error("Could not roll back transaction [{name}]: {reason}")]
    Rollback {
        /// Transaction name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// `Mandatory` propagation found no transaction to join.
    #[error("No existing transaction found for [{name}] with propagation 'mandatory'")]
    MandatoryWithoutTransaction {
        /// Owner name.
        name: String,
    },

    /// `Never` propagation found an active transaction.
    #[error("Existing transaction found for [{name}] with propagation 'never'")]
    NeverWithTransaction {
        /// Owner name.
        name: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("Transaction [{name}] is already completed")]
    AlreadyCompleted {
        /// Transaction name.
        name: String,
    },
}

/// Failure of a [`crate::message::Message`] operation.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The message was closed before it was read.
    #[error("Message is closed")]
    Closed,

    /// A non-repeatable stream was already read.
    #[error("Message stream was already consumed")]
    AlreadyConsumed,

    /// The content is not valid text in the declared charset.
    #[error("Message is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Reading the underlying stream failed.
    #[error("Message read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The run exception: any failure that ends or redirects a pipeline run.
#[derive(Debug, Error)]
pub enum PipeRunError {
    /// A pipe or chain step failed.
    #[error("{}{message}", pipe_prefix(.pipe))]
    Failed {
        /// Pipe that failed, if known.
        pipe: Option<String>,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// A forward was found whose path is empty.
    #[error("Pipeline [{pipeline}] forward [{forward}] of pipe [{pipe}] has a path that is empty")]
    EmptyForwardPath {
        /// Pipeline name.
        pipeline: String,
        /// Pipe that returned the forward.
        pipe: String,
        /// Forward name.
        forward: String,
    },

    /// A forward path names neither a pipe nor an exit.
    #[error("Pipeline [{pipeline}] target to execute [{path}] of forward [{forward}] of pipe [{pipe}] is not defined as a pipe or an exit")]
    UnresolvedForward {
        /// Pipeline name.
        pipeline: String,
        /// Pipe that returned the forward.
        pipe: String,
        /// Forward name.
        forward: String,
        /// Unresolvable path.
        path: String,
    },

    /// A pipe named at run time does not exist.
    #[error("Pipeline [{pipeline}] has no pipe named [{name}]")]
    MissingPipe {
        /// Pipeline name.
        pipeline: String,
        /// Requested pipe name.
        name: String,
    },

    /// A transaction timeout fired before the work completed.
    #[error("[{owner}] timed out after {:.3}s", .timeout.as_secs_f64())]
    Timeout {
        /// Owner of the timed-out scope.
        owner: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// A blocking wait was interrupted.
    #[error("[{owner}] interrupted: {reason}")]
    Interrupted {
        /// Owner of the interrupted wait.
        owner: String,
        /// What was interrupted.
        reason: String,
    },

    /// A pipe-level lock could not be acquired and the pipe fails on a busy lock.
    #[error("Could not obtain lock [{lock}] for pipe [{pipe}]")]
    LockNotAcquired {
        /// Lock object id.
        lock: String,
        /// Owning pipe.
        pipe: String,
    },

    /// Locker failure.
    #[error("{0}")]
    Locker(#[from] LockerError),

    /// Transaction failure.
    #[error("{0}")]
    Transaction(#[from] TransactionError),

    /// Message failure.
    #[error("{0}")]
    Message(#[from] MessageError),

    /// The graph turned out to be invalid at run time.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The pre-processing pipeline for empty input did not succeed.
    #[error("Pre-processing pipeline [{pipeline}] ended in state [{state}]")]
    PreProcessing {
        /// Pre-processing pipeline name.
        pipeline: String,
        /// Exit state it ended in.
        state: String,
    },

    /// A nested pipeline call went deeper than allowed.
    #[error("Maximum sub-pipeline depth ({max_depth}) exceeded calling [{pipeline}]")]
    DepthExceeded {
        /// Target pipeline.
        pipeline: String,
        /// Configured limit.
        max_depth: u32,
    },
}

fn pipe_prefix(pipe: &Option<String>) -> String {
    pipe.as_ref().map(|p| format!("Pipe [{p}] ")).unwrap_or_default()
}

impl PipeRunError {
    /// Creates a failure attributed to a pipe.
    #[must_use]
    pub fn pipe_failed(pipe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            pipe: Some(pipe.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure attributed to a pipe, keeping its cause.
    #[must_use]
    pub fn pipe_failed_with(
        pipe: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Failed {
            pipe: Some(pipe.into()),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a failure with no owning pipe.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            pipe: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(owner: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            owner: owner.into(),
            timeout,
        }
    }

    /// Creates an interruption error.
    #[must_use]
    pub fn interrupted(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    /// Returns the name of the unit that failed, when known.
    #[must_use]
    pub fn pipe_in_error(&self) -> Option<&str> {
        match self {
            Self::Failed { pipe, .. } => pipe.as_deref(),
            Self::EmptyForwardPath { pipe, .. }
            | Self::UnresolvedForward { pipe, .. }
            | Self::LockNotAcquired { pipe, .. } => Some(pipe),
            Self::Timeout { owner, .. } | Self::Interrupted { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// Returns true for interruption or timeout failures.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Interrupted { .. })
    }

    /// Returns the error type name used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::EmptyForwardPath { .. } => "empty_forward_path",
            Self::UnresolvedForward { .. } => "unresolved_forward",
            Self::MissingPipe { .. } => "missing_pipe",
            Self::Timeout { .. } => "timeout",
            Self::Interrupted { .. } => "interrupted",
            Self::LockNotAcquired { .. } => "lock_not_acquired",
            Self::Locker(_) => "locker",
            Self::Transaction(_) => "transaction",
            Self::Message(_) => "message",
            Self::Configuration(_) => "configuration",
            Self::PreProcessing { .. } => "pre_processing",
            Self::DepthExceeded { .. } => "depth_exceeded",
        }
    }

    /// Returns the messages of this error and all its sources, outermost first.
    #[must_use]
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            chain.push(cause.to_string());
            current = cause.source();
        }
        chain
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(pipe) = self.pipe_in_error() {
            map.insert("pipe".to_string(), serde_json::json!(pipe));
        }
        let chain = self.cause_chain();
        if chain.len() > 1 {
            map.insert("causes".to_string(), serde_json::json!(&chain[1..]));
        }
        if let Self::Configuration(err) = self {
            if let Some(code) = err.code() {
                map.insert("code".to_string(), serde_json::json!(code));
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_with_info() {
        let err = ConfigurationError::new("forward [success] of pipe [a] is unresolved")
            .with_pipes(vec!["a".to_string()])
            .with_error_info(ErrorInfo::new("CONFIG-004-UNRESOLVED_FORWARD", "Unresolved forward"));

        assert_eq!(err.code(), Some("CONFIG-004-UNRESOLVED_FORWARD"));
        let dict = err.to_dict();
        assert!(dict.contains_key("error_info"));
        assert_eq!(dict["pipes"], serde_json::json!(["a"]));
    }

    #[test]
    fn test_error_info_picks_up_suggestion() {
        let info = ErrorInfo::new("CONFIG-001-NO_PIPES", "No pipes");
        assert!(info.fix_hint.is_some());
    }

    #[test]
    fn test_pipe_failed_display() {
        let err = PipeRunError::pipe_failed("transform", "bad input");
        assert_eq!(err.to_string(), "Pipe [transform] bad input");
        assert_eq!(err.pipe_in_error(), Some("transform"));
    }

    #[test]
    fn test_cause_chain_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = PipeRunError::pipe_failed_with("writer", "could not write", io);
        let chain = err.cause_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], "disk gone");
        assert_eq!(err.to_dict()["causes"], serde_json::json!(["disk gone"]));
    }

    #[test]
    fn test_interruption_kinds() {
        assert!(PipeRunError::timeout("tx", Duration::from_secs(1)).is_interruption());
        assert!(PipeRunError::interrupted("throttle", "closed").is_interruption());
        assert!(!PipeRunError::failed("x").is_interruption());
    }

    #[test]
    fn test_locker_error_converts() {
        let err: PipeRunError = LockerError::Store {
            lock: "l".to_string(),
            reason: "down".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "locker");
    }
}
