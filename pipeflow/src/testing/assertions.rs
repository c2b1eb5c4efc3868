//! Test assertions for pipeline results.

use crate::core::{ExitState, PipeLineResult};
use crate::session::Session;

/// Asserts that the run ended in a SUCCESS exit.
pub fn assert_result_succeeded(result: &PipeLineResult) {
    assert!(
        result.is_successful(),
        "Expected success, got state {:?} (exit code {})",
        result.state,
        result.exit_code
    );
}

/// Asserts the exit state and code of a run.
pub fn assert_result_state(result: &PipeLineResult, state: ExitState, exit_code: i32) {
    assert_eq!(
        (result.state, result.exit_code),
        (state, exit_code),
        "Unexpected exit state or code"
    );
}

/// Asserts the result text of a run.
pub fn assert_result_text(result: &PipeLineResult, expected: &str) {
    let actual = result.result.as_string();
    assert!(
        matches!(&actual, Ok(Some(text)) if text == expected),
        "Expected result text {expected:?}, got {actual:?}"
    );
}

/// Asserts that the session holds `key` with the given text.
pub fn assert_session_value(session: &Session, key: &str, expected: &str) {
    let actual = session.get_string(key);
    assert_eq!(
        actual.as_deref(),
        Some(expected),
        "Expected session key '{key}' to be {expected:?}, got {actual:?}"
    );
}
