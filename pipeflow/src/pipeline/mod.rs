//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipe specifications
//! - The pipeline builder with configuration-time validation
//! - The immutable pipe graph and forward resolution
//! - The engine and its dispatch loop

mod builder;
mod context;
mod dispatch;
mod engine;
mod exit;
mod graph;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipeLineBuilder;
pub use context::PipeLineContext;
pub use engine::{Engine, EngineBuilder};
pub(crate) use engine::run_exit_handlers;
pub use exit::ExitHandler;
pub use graph::{
    ForwardTarget, PipeLine, INPUT_VALIDATOR_NAME, INPUT_WRAPPER_NAME, OUTPUT_VALIDATOR_NAME, OUTPUT_WRAPPER_NAME,
};
pub use spec::PipeSpec;

pub(crate) use dispatch::run_pipeline_core;
