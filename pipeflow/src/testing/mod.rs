//! Testing utilities for pipeflow pipelines.
//!
//! This module provides:
//! - Mock pipes and a counting resource
//! - Assertions for pipeline results
//! - A pipeline harness bundling an engine with one built pipeline

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_result_state, assert_result_succeeded, assert_result_text, assert_session_value,
};
pub use fixtures::{PipeHarness, HARNESS_PIPE_NAME};
pub use mocks::{CountingCloseable, FailingPipe, MockPipe, RecordingPipe, SlowPipe};
