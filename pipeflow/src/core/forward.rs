//! Forwards and per-pipe results.

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Name of the forward a pipe takes when it succeeds.
pub const SUCCESS_FORWARD_NAME: &str = "success";

/// Name of the forward taken when a pipe fails and recovers locally.
pub const EXCEPTION_FORWARD_NAME: &str = "exception";

/// A named edge from a pipe outcome to a pipe or an exit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipeForward {
    /// Forward name, e.g. `success`.
    pub name: String,
    /// Name of the target pipe or exit.
    pub path: String,
}

impl PipeForward {
    /// Creates a forward.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Creates a `success` forward.
    #[must_use]
    pub fn success(path: impl Into<String>) -> Self {
        Self::new(SUCCESS_FORWARD_NAME, path)
    }

    /// Creates an `exception` forward.
    #[must_use]
    pub fn exception(path: impl Into<String>) -> Self {
        Self::new(EXCEPTION_FORWARD_NAME, path)
    }

    /// Returns true for the `success` forward.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.name == SUCCESS_FORWARD_NAME
    }
}

/// The outcome of one pipe invocation.
#[derive(Debug, Clone)]
pub struct PipeRunResult {
    /// Output message.
    pub result: Message,
    /// Forward chosen by the pipe.
    pub forward: PipeForward,
}

impl PipeRunResult {
    /// Creates a result.
    #[must_use]
    pub fn new(result: impl Into<Message>, forward: PipeForward) -> Self {
        Self {
            result: result.into(),
            forward,
        }
    }

    /// Returns true when the `success` forward was chosen.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.forward.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_constructors() {
        assert!(PipeForward::success("next").is_success());
        assert!(!PipeForward::exception("error").is_success());
        assert_eq!(PipeForward::exception("error").name, EXCEPTION_FORWARD_NAME);
    }

    #[test]
    fn test_run_result_success() {
        let r = PipeRunResult::new("x", PipeForward::success("READY"));
        assert!(r.is_successful());
        let r = PipeRunResult::new("x", PipeForward::new("failure", "err"));
        assert!(!r.is_successful());
    }
}
