//! Elapsed-time measurement for pipes and pipelines.

use crate::utils::timestamps::duration_millis;
use std::time::{Duration, Instant};
use tracing::trace;

/// Measures one execution of a pipe or pipeline.
#[derive(Debug)]
pub struct SpanTimer {
    owner: String,
    started: Instant,
}

impl SpanTimer {
    /// Starts timing an execution of `owner`.
    #[must_use]
    pub fn start(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            started: Instant::now(),
        }
    }

    /// Name of the timed pipe or pipeline.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whole milliseconds elapsed so far.
    #[must_use]
    pub fn elapsed_millis(&self) -> u64 {
        duration_millis(self.started.elapsed())
    }

    /// Stops the timer.
    #[must_use]
    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        trace!(owner = %self.owner, elapsed_ms = duration_millis(elapsed), "Execution timed");
        elapsed
    }
}
