//! The processor chains wrapped around every pipe call and pipeline run.
//!
//! A chain is an ordered list of steps, outermost first. Each step receives
//! the rest of the chain as an explicit continuation ([`PipeNext`] or
//! [`PipeLineNext`]); the innermost continuation calls the pipe, or runs the
//! dispatch loop of the pipeline.

mod base;
mod cache;
mod chain;
mod exception;
mod locker;
mod monitoring;
mod throttle;
mod transaction;

pub use cache::{CachePipeLineProcessor, CachePipeProcessor};
pub use chain::{PipeLineNext, PipeLineProcessor, PipeNext, PipeProcessor};
pub use exception::ExceptionPipeProcessor;
pub use locker::{LockerPipeLineProcessor, LockerPipeProcessor};
pub use monitoring::{MonitoringPipeLineProcessor, MonitoringPipeProcessor};
pub use throttle::{ThrottlePipeLineProcessor, ThrottlePipeProcessor};
pub use transaction::{TransactionPipeLineProcessor, TransactionPipeProcessor};

use std::sync::Arc;

/// The standard pipe chain.
///
/// Pipe durations include lock and throttle waits. A pipe's transaction
/// scope is complete before its failure is redirected.
#[must_use]
pub fn default_pipe_chain() -> Vec<Arc<dyn PipeProcessor>> {
    vec![
        Arc::new(MonitoringPipeProcessor),
        Arc::new(ExceptionPipeProcessor),
        Arc::new(TransactionPipeProcessor),
        Arc::new(LockerPipeProcessor),
        Arc::new(ThrottlePipeProcessor),
        Arc::new(CachePipeProcessor),
    ]
}

/// The standard pipeline chain.
#[must_use]
pub fn default_pipeline_chain() -> Vec<Arc<dyn PipeLineProcessor>> {
    vec![
        Arc::new(MonitoringPipeLineProcessor),
        Arc::new(TransactionPipeLineProcessor),
        Arc::new(LockerPipeLineProcessor),
        Arc::new(ThrottlePipeLineProcessor),
        Arc::new(CachePipeLineProcessor),
    ]
}
