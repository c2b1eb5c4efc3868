//! Pipeline exits and results.

use super::forward::{PipeRunResult, EXCEPTION_FORWARD_NAME};
use super::status::ExitState;
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Name of the exit created when a pipeline declares none.
pub const DEFAULT_SUCCESS_EXIT_NAME: &str = "READY";

/// A terminal node of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeLineExit {
    /// Exit name, the target of forwards.
    pub name: String,
    /// State reported when the run ends here.
    pub state: ExitState,
    /// Numeric exit code.
    #[serde(default)]
    pub exit_code: i32,
    /// When true the run result is an empty message.
    #[serde(default)]
    pub empty_result: bool,
}

impl PipeLineExit {
    /// Creates an exit.
    #[must_use]
    pub fn new(name: impl Into<String>, state: ExitState) -> Self {
        Self {
            name: name.into(),
            state,
            exit_code: 0,
            empty_result: false,
        }
    }

    /// Creates a SUCCESS exit.
    #[must_use]
    pub fn success(name: impl Into<String>) -> Self {
        Self::new(name, ExitState::Success)
    }

    /// Creates an ERROR exit.
    #[must_use]
    pub fn error(name: impl Into<String>) -> Self {
        Self::new(name, ExitState::Error)
    }

    /// Sets the exit code.
    #[must_use]
    pub const fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Makes the run result empty at this exit.
    #[must_use]
    pub const fn with_empty_result(mut self) -> Self {
        self.empty_result = true;
        self
    }
}

/// Final outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipeLineResult {
    /// Result message.
    pub result: Message,
    /// Exit state.
    pub state: ExitState,
    /// Exit code.
    pub exit_code: i32,
}

impl PipeLineResult {
    /// Creates a result.
    #[must_use]
    pub fn new(result: impl Into<Message>, state: ExitState, exit_code: i32) -> Self {
        Self {
            result: result.into(),
            state,
            exit_code,
        }
    }

    /// The empty SUCCESS result reported when a run is skipped.
    #[must_use]
    pub fn skipped() -> Self {
        Self::new(Message::null(), ExitState::Success, 0)
    }

    /// Returns true for a SUCCESS state.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        self.state.is_success()
    }
}

/// Outcome of a unit of work as seen by the transaction guard.
pub trait ProcessOutcome {
    /// Returns true when the outcome must roll back the enclosing transaction.
    fn requires_rollback(&self) -> bool;
}

impl ProcessOutcome for PipeLineResult {
    fn requires_rollback(&self) -> bool {
        !self.state.is_success()
    }
}

impl ProcessOutcome for PipeRunResult {
    fn requires_rollback(&self) -> bool {
        self.forward.name == EXCEPTION_FORWARD_NAME
    }
}
