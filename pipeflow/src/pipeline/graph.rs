//! The built, immutable pipe graph.

use super::exit::ExitHandler;
use super::spec::PipeSpec;
use crate::cache::Cache;
use crate::concurrency::{ConcurrencyThrottle, LazyThrottle};
use crate::core::{ExitState, PipeForward, PipeLineExit};
use crate::errors::PipeRunError;
use crate::locking::{LockBusyPolicy, Locker};
use crate::statistics::PipeLineStatistics;
use crate::transaction::TransactionAttributes;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Name given to the input validator of a pipeline.
pub const INPUT_VALIDATOR_NAME: &str = "- pipeline inputValidator";
/// Name given to the output validator of a pipeline.
pub const OUTPUT_VALIDATOR_NAME: &str = "- pipeline outputValidator";
/// Name given to the input wrapper of a pipeline.
pub const INPUT_WRAPPER_NAME: &str = "- pipeline inputWrapper";
/// Name given to the output wrapper of a pipeline.
pub const OUTPUT_WRAPPER_NAME: &str = "- pipeline outputWrapper";

/// Where a forward leads.
#[derive(Debug, Clone, Copy)]
pub enum ForwardTarget<'a> {
    /// Another pipe.
    Pipe(&'a PipeSpec),
    /// A terminal exit.
    Exit(&'a PipeLineExit),
}

/// A validated pipeline: pipes, exits and the settings the processor chain
/// applies to the run as a whole.
///
/// Built by [`PipeLineBuilder`](super::PipeLineBuilder); never changes
/// afterwards except for its statistics and lazily created throttles.
pub struct PipeLine {
    pub(super) name: String,
    pub(super) pipes: Vec<PipeSpec>,
    pub(super) pipe_index: HashMap<String, usize>,
    pub(super) exits: Vec<PipeLineExit>,
    pub(super) first_pipe: String,
    pub(super) input_validator: Option<PipeSpec>,
    pub(super) output_validator: Option<PipeSpec>,
    pub(super) input_wrapper: Option<PipeSpec>,
    pub(super) output_wrapper: Option<PipeSpec>,
    pub(super) locker: Option<Arc<dyn Locker>>,
    pub(super) lock_busy_policy: Option<LockBusyPolicy>,
    pub(super) transaction: TransactionAttributes,
    pub(super) max_threads: i32,
    pub(super) cache: Option<Arc<dyn Cache>>,
    pub(super) hide_regex: Option<Regex>,
    pub(super) transform_null_message: Option<String>,
    pub(super) run_before_on_empty_input: Option<String>,
    pub(super) exit_handlers: Vec<Arc<dyn ExitHandler>>,
    pub(super) statistics: PipeLineStatistics,
    pub(super) throttle: LazyThrottle,
}

impl PipeLine {
    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipes in declaration order.
    #[must_use]
    pub fn pipes(&self) -> &[PipeSpec] {
        &self.pipes
    }

    /// Looks up a pipe by name.
    #[must_use]
    pub fn pipe(&self, name: &str) -> Option<&PipeSpec> {
        self.pipe_index.get(name).map(|&i| &self.pipes[i])
    }

    /// Exits in declaration order.
    #[must_use]
    pub fn exits(&self) -> &[PipeLineExit] {
        &self.exits
    }

    /// Looks up an exit by name.
    #[must_use]
    pub fn exit(&self, name: &str) -> Option<&PipeLineExit> {
        self.exits.iter().find(|e| e.name == name)
    }

    /// First exit with the given state.
    #[must_use]
    pub fn first_exit_with_state(&self, state: ExitState) -> Option<&PipeLineExit> {
        self.exits.iter().find(|e| e.state == state)
    }

    /// Name of the pipe a run starts at.
    #[must_use]
    pub fn first_pipe(&self) -> &str {
        &self.first_pipe
    }

    /// Input validator, if any.
    #[must_use]
    pub const fn input_validator(&self) -> Option<&PipeSpec> {
        self.input_validator.as_ref()
    }

    /// Output validator, if any.
    #[must_use]
    pub const fn output_validator(&self) -> Option<&PipeSpec> {
        self.output_validator.as_ref()
    }

    /// Input wrapper, if any.
    #[must_use]
    pub const fn input_wrapper(&self) -> Option<&PipeSpec> {
        self.input_wrapper.as_ref()
    }

    /// Output wrapper, if any.
    #[must_use]
    pub const fn output_wrapper(&self) -> Option<&PipeSpec> {
        self.output_wrapper.as_ref()
    }

    /// Lock held for a whole run.
    #[must_use]
    pub fn locker(&self) -> Option<&Arc<dyn Locker>> {
        self.locker.as_ref()
    }

    /// Busy-lock policy override.
    #[must_use]
    pub const fn lock_busy_policy(&self) -> Option<LockBusyPolicy> {
        self.lock_busy_policy
    }

    /// Transaction attributes of a whole run.
    #[must_use]
    pub const fn transaction(&self) -> TransactionAttributes {
        self.transaction
    }

    /// Concurrency limit of whole runs.
    #[must_use]
    pub const fn max_threads(&self) -> i32 {
        self.max_threads
    }

    /// Result cache of whole runs.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Text that replaces an empty input.
    #[must_use]
    pub fn transform_null_message(&self) -> Option<&str> {
        self.transform_null_message.as_deref()
    }

    /// Pipeline run first when the input is empty.
    #[must_use]
    pub fn run_before_on_empty_input(&self) -> Option<&str> {
        self.run_before_on_empty_input.as_deref()
    }

    /// Handlers called after every run.
    #[must_use]
    pub fn exit_handlers(&self) -> &[Arc<dyn ExitHandler>] {
        &self.exit_handlers
    }

    /// Run statistics.
    #[must_use]
    pub const fn statistics(&self) -> &PipeLineStatistics {
        &self.statistics
    }

    /// Throttle of whole runs, created on first use. `None` when unlimited.
    #[must_use]
    pub fn throttle(&self) -> Option<&Arc<ConcurrencyThrottle>> {
        self.throttle.get_or_init(&self.name, self.max_threads)
    }

    /// The pipeline's own hide pattern followed by those of all its pipes.
    #[must_use]
    pub fn hide_patterns(&self) -> Vec<Regex> {
        self.hide_regex
            .iter()
            .chain(self.all_specs().filter_map(|s| s.hide_regex.as_ref()))
            .cloned()
            .collect()
    }

    /// Returns true if any pipe takes its input from `key`.
    #[must_use]
    pub fn reads_session_key(&self, key: &str) -> bool {
        self.all_specs()
            .any(|s| s.input_session_key.as_deref() == Some(key))
    }

    /// Every spec including validators and wrappers.
    pub fn all_specs(&self) -> impl Iterator<Item = &PipeSpec> {
        self.pipes.iter().chain(
            [
                &self.input_validator,
                &self.output_validator,
                &self.input_wrapper,
                &self.output_wrapper,
            ]
            .into_iter()
            .flatten(),
        )
    }

    /// Resolves the target of a forward returned by `pipe_name`.
    ///
    /// Exits are looked up before pipes.
    pub fn resolve_forward(&self, pipe_name: &str, forward: &PipeForward) -> Result<ForwardTarget<'_>, PipeRunError> {
        let path = forward.path.as_str();
        if path.trim().is_empty() {
            return Err(PipeRunError::EmptyForwardPath {
                pipeline: self.name.clone(),
                pipe: pipe_name.to_string(),
                forward: forward.name.clone(),
            });
        }
        if let Some(exit) = self.exit(path) {
            return Ok(ForwardTarget::Exit(exit));
        }
        if let Some(pipe) = self.pipe(path) {
            return Ok(ForwardTarget::Pipe(pipe));
        }
        Err(PipeRunError::UnresolvedForward {
            pipeline: self.name.clone(),
            pipe: pipe_name.to_string(),
            forward: forward.name.clone(),
            path: path.to_string(),
        })
    }

    /// Opens caches and starts every pipe.
    pub async fn start(&self) -> Result<(), PipeRunError> {
        info!(pipeline = %self.name, pipes = self.pipes.len(), "Starting pipeline");
        if let Some(cache) = &self.cache {
            cache.open();
        }
        for spec in self.all_specs() {
            if let Some(cache) = &spec.cache {
                cache.open();
            }
            spec.pipe.start().await?;
        }
        Ok(())
    }

    /// Stops every pipe, closes caches and interrupts throttle waiters.
    pub async fn stop(&self) {
        info!(pipeline = %self.name, "Stopping pipeline");
        for spec in self.all_specs() {
            spec.pipe.stop().await;
            if let Some(cache) = &spec.cache {
                cache.close();
            }
            spec.throttle.close();
        }
        if let Some(cache) = &self.cache {
            cache.close();
        }
        self.throttle.close();
        debug!(pipeline = %self.name, "Pipeline stopped");
    }
}

impl fmt::Debug for PipeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeLine")
            .field("name", &self.name)
            .field("pipes", &self.pipes.iter().map(|p| p.name.as_str()).collect::<Vec<_>>())
            .field("exits", &self.exits.iter().map(|e| e.name.as_str()).collect::<Vec<_>>())
            .field("first_pipe", &self.first_pipe)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationWarnings;
    use crate::pipeline::PipeLineBuilder;
    use crate::pipes::EchoPipe;
    use pretty_assertions::assert_eq;

    fn pipeline() -> PipeLine {
        PipeLineBuilder::new("graph")
            .pipe(PipeSpec::new("a", Arc::new(EchoPipe)).with_hide_regex(Regex::new("secret").unwrap()))
            .unwrap()
            .pipe(PipeSpec::new("b", Arc::new(EchoPipe)))
            .unwrap()
            .exit(PipeLineExit::success("DONE"))
            .unwrap()
            .exit(PipeLineExit::error("a"))
            .unwrap()
            .hide_regex(Regex::new("pin=\\d+").unwrap())
            .build(&ConfigurationWarnings::new())
            .unwrap()
    }

    #[test]
    fn test_exit_wins_over_pipe_of_same_name() {
        let p = pipeline();
        let target = p.resolve_forward("b", &PipeForward::success("a")).unwrap();
        assert!(matches!(target, ForwardTarget::Exit(exit) if exit.state == ExitState::Error));
    }

    #[test]
    fn test_resolve_pipe_and_missing() {
        let p = pipeline();
        assert!(matches!(
            p.resolve_forward("a", &PipeForward::success("b")).unwrap(),
            ForwardTarget::Pipe(spec) if spec.name == "b"
        ));
        let err = p.resolve_forward("a", &PipeForward::success("nowhere")).unwrap_err();
        assert!(matches!(err, PipeRunError::UnresolvedForward { ref path, .. } if path == "nowhere"));
    }

    #[test]
    fn test_empty_path_fails_immediately() {
        let p = pipeline();
        let err = p.resolve_forward("b", &PipeForward::new("odd", "  ")).unwrap_err();
        assert!(matches!(err, PipeRunError::EmptyForwardPath { .. }));
    }

    #[test]
    fn test_hide_patterns_combine_pipeline_and_pipes() {
        let p = pipeline();
        let patterns: Vec<String> = p.hide_patterns().iter().map(|r| r.as_str().to_string()).collect();
        assert_eq!(patterns, vec!["pin=\\d+".to_string(), "secret".to_string()]);
    }

    #[test]
    fn test_unlimited_pipeline_has_no_throttle() {
        assert!(pipeline().throttle().is_none());
    }
}
