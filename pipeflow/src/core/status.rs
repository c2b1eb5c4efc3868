//! Exit state of a pipeline run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a pipeline exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitState {
    /// The run completed successfully.
    Success,
    /// The run completed in error.
    Error,
    /// The message was rejected; the run itself completed.
    Rejected,
}

impl Default for ExitState {
    fn default() -> Self {
        Self::Success
    }
}

impl ExitState {
    /// Returns true for [`ExitState::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown exit state: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for state in [ExitState::Success, ExitState::Error, ExitState::Rejected] {
            assert_eq!(state.to_string().parse::<ExitState>().unwrap(), state);
        }
        assert_eq!("error".parse::<ExitState>().unwrap(), ExitState::Error);
        assert!("done".parse::<ExitState>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&ExitState::Success).unwrap(), "\"SUCCESS\"");
    }
}
