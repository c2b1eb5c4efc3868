//! # Pipeflow
//!
//! A message pipeline execution engine.
//!
//! A pipeline is a named graph of pipes. Each pipe transforms a message and
//! names a forward; forwards lead to other pipes or to an exit, which ends
//! the run with a state and exit code. Around every pipe call and every
//! pipeline run sits a chain of processors that adds:
//!
//! - **Monitoring**: durations, message sizes and lifecycle events
//! - **Exception routing**: failures turned into an `exception` forward
//! - **Transactions**: demarcation with timeouts and rollback on failure
//! - **Locking**: mutual exclusion with a skip or fail policy when busy
//! - **Throttling**: a bound on concurrent executions
//! - **Caching**: results keyed on the input
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeflow::prelude::*;
//!
//! let engine = Engine::new();
//! let pipeline = PipeLineBuilder::new("greet")
//!     .pipe(PipeSpec::new("hello", Arc::new(FixedResultPipe::new("hello ${name}").with_substitution())))?
//!     .exit(PipeLineExit::success("READY"))?
//!     .build(engine.warnings())?;
//! let pipeline = engine.register(pipeline);
//!
//! let session = Session::new();
//! session.put("name", "world");
//! let result = engine.run(&pipeline, "m-1", Message::text("ignored"), &session, None).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod locking;
pub mod message;
pub mod observability;
pub mod pipeline;
pub mod pipes;
pub mod processors;
pub mod session;
pub mod statistics;
pub mod subpipeline;
pub mod testing;
pub mod transaction;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{Cache, CacheConfig, InMemoryCache};
    pub use crate::config::{ConfigurationWarnings, EngineConfig};
    pub use crate::core::{
        ExitState, PipeForward, PipeLineExit, PipeLineResult, PipeRunResult, EXCEPTION_FORWARD_NAME,
        SUCCESS_FORWARD_NAME,
    };
    pub use crate::errors::{ConfigurationError, PipeRunError, PipeflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipeEvent};
    pub use crate::locking::{LocalLocker, LockBusyPolicy, Locker, LockerConfig};
    pub use crate::message::{Closeable, Message};
    pub use crate::pipeline::{Engine, EngineBuilder, PipeLine, PipeLineBuilder, PipeSpec};
    pub use crate::pipes::{EchoPipe, FixedResultPipe, FnPipe, Pipe, PipeContext};
    pub use crate::session::Session;
    pub use crate::subpipeline::SubPipelinePipe;
    pub use crate::transaction::{TransactionAttribute, TransactionAttributes, TransactionManager};
    pub use std::sync::Arc;
}
