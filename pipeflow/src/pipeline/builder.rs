//! Pipeline builder with validation.

use super::exit::ExitHandler;
use super::graph::{
    PipeLine, INPUT_VALIDATOR_NAME, INPUT_WRAPPER_NAME, OUTPUT_VALIDATOR_NAME, OUTPUT_WRAPPER_NAME,
};
use super::spec::PipeSpec;
use crate::cache::Cache;
use crate::concurrency::LazyThrottle;
use crate::config::ConfigurationWarnings;
use crate::core::{ExitState, PipeForward, PipeLineExit, DEFAULT_SUCCESS_EXIT_NAME, SUCCESS_FORWARD_NAME};
use crate::errors::{ConfigurationError, ErrorInfo};
use crate::locking::{LockBusyPolicy, Locker};
use crate::statistics::PipeLineStatistics;
use crate::transaction::TransactionAttributes;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Builder for [`PipeLine`]s.
///
/// Pipe and exit names are checked as they are added; forwards are checked
/// by [`build`](Self::build) once every target is known.
#[derive(Debug)]
pub struct PipeLineBuilder {
    name: String,
    pipes: Vec<PipeSpec>,
    exits: Vec<PipeLineExit>,
    first_pipe: Option<String>,
    global_forwards: Vec<PipeForward>,
    input_validator: Option<PipeSpec>,
    output_validator: Option<PipeSpec>,
    input_wrapper: Option<PipeSpec>,
    output_wrapper: Option<PipeSpec>,
    locker: Option<Arc<dyn Locker>>,
    lock_busy_policy: Option<LockBusyPolicy>,
    transaction: TransactionAttributes,
    max_threads: i32,
    cache: Option<Arc<dyn Cache>>,
    hide_regex: Option<Regex>,
    transform_null_message: Option<String>,
    run_before_on_empty_input: Option<String>,
    exit_handlers: Vec<Arc<dyn ExitHandler>>,
}

impl PipeLineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipes: Vec::new(),
            exits: Vec::new(),
            first_pipe: None,
            global_forwards: Vec::new(),
            input_validator: None,
            output_validator: None,
            input_wrapper: None,
            output_wrapper: None,
            locker: None,
            lock_busy_policy: None,
            transaction: TransactionAttributes::default(),
            max_threads: 0,
            cache: None,
            hide_regex: None,
            transform_null_message: None,
            run_before_on_empty_input: None,
            exit_handlers: Vec::new(),
        }
    }

    /// Adds a pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe is invalid on its own or its name is taken.
    pub fn pipe(mut self, spec: PipeSpec) -> Result<Self, ConfigurationError> {
        spec.validate()?;
        if self.pipes.iter().any(|p| p.name == spec.name) {
            return Err(ConfigurationError::new(format!(
                "Pipeline [{}] already has a pipe named [{}]",
                self.name, spec.name
            ))
            .with_pipes(vec![spec.name.clone()])
            .with_error_info(ErrorInfo::new(
                "CONFIG-002-DUPLICATE_PIPE",
                format!("Pipe '{}' is declared twice", spec.name),
            )));
        }
        self.pipes.push(spec);
        Ok(self)
    }

    /// Adds an exit.
    ///
    /// # Errors
    ///
    /// Returns an error if an exit with the same name exists.
    pub fn exit(mut self, exit: PipeLineExit) -> Result<Self, ConfigurationError> {
        if self.exits.iter().any(|e| e.name == exit.name) {
            return Err(ConfigurationError::new(format!(
                "Pipeline [{}] already has an exit named [{}]",
                self.name, exit.name
            ))
            .with_error_info(ErrorInfo::new(
                "CONFIG-005-DUPLICATE_EXIT",
                format!("Exit '{}' is declared twice", exit.name),
            )));
        }
        self.exits.push(exit);
        Ok(self)
    }

    /// Starts runs at this pipe instead of the first declared one.
    #[must_use]
    pub fn first_pipe(mut self, name: impl Into<String>) -> Self {
        self.first_pipe = Some(name.into());
        self
    }

    /// Adds a forward to every pipe that does not declare one with the same name.
    #[must_use]
    pub fn global_forward(mut self, forward: PipeForward) -> Self {
        self.global_forwards.push(forward);
        self
    }

    /// Validates the input before the first pipe.
    #[must_use]
    pub fn input_validator(mut self, mut spec: PipeSpec) -> Self {
        spec.name = INPUT_VALIDATOR_NAME.to_string();
        self.input_validator = Some(spec);
        self
    }

    /// Validates the output once per run when an exit is reached.
    #[must_use]
    pub fn output_validator(mut self, mut spec: PipeSpec) -> Self {
        spec.name = OUTPUT_VALIDATOR_NAME.to_string();
        self.output_validator = Some(spec);
        self
    }

    /// Transforms the input before the first pipe.
    #[must_use]
    pub fn input_wrapper(mut self, mut spec: PipeSpec) -> Self {
        spec.name = INPUT_WRAPPER_NAME.to_string();
        self.input_wrapper = Some(spec);
        self
    }

    /// Transforms the output when an exit is reached.
    #[must_use]
    pub fn output_wrapper(mut self, mut spec: PipeSpec) -> Self {
        spec.name = OUTPUT_WRAPPER_NAME.to_string();
        self.output_wrapper = Some(spec);
        self
    }

    /// Holds a lock around every run.
    #[must_use]
    pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Overrides the engine default for a busy lock.
    #[must_use]
    pub const fn lock_busy_policy(mut self, policy: LockBusyPolicy) -> Self {
        self.lock_busy_policy = Some(policy);
        self
    }

    /// Sets transaction attributes for whole runs.
    #[must_use]
    pub const fn transaction(mut self, attributes: TransactionAttributes) -> Self {
        self.transaction = attributes;
        self
    }

    /// Limits concurrent runs.
    #[must_use]
    pub const fn max_threads(mut self, max: i32) -> Self {
        self.max_threads = max;
        self
    }

    /// Caches results of whole runs.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Masks matches of `regex` in logs during a run.
    #[must_use]
    pub fn hide_regex(mut self, regex: Regex) -> Self {
        self.hide_regex = Some(regex);
        self
    }

    /// Replaces an empty input with `text`.
    #[must_use]
    pub fn transform_null_message(mut self, text: impl Into<String>) -> Self {
        self.transform_null_message = Some(text.into());
        self
    }

    /// Runs another registered pipeline first when the input is empty.
    #[must_use]
    pub fn run_before_on_empty_input(mut self, pipeline: impl Into<String>) -> Self {
        self.run_before_on_empty_input = Some(pipeline.into());
        self
    }

    /// Adds an exit handler.
    #[must_use]
    pub fn exit_handler(mut self, handler: Arc<dyn ExitHandler>) -> Self {
        self.exit_handlers.push(handler);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of pipes added so far.
    #[must_use]
    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    /// Builds the pipeline.
    ///
    /// Adds the default `READY` exit when none is declared, global forwards,
    /// and a `success` forward to every pipe lacking one (next pipe, or the
    /// first SUCCESS exit for the last pipe). Non-fatal findings go to
    /// `warnings`.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no pipes, the first pipe is unknown, or a
    /// forward leads nowhere.
    pub fn build(self, warnings: &ConfigurationWarnings) -> Result<PipeLine, ConfigurationError> {
        let name = self.name;
        if self.pipes.is_empty() {
            return Err(ConfigurationError::new(format!("Pipeline [{name}] has no pipes"))
                .with_error_info(ErrorInfo::new("CONFIG-001-NO_PIPES", "Cannot build an empty pipeline")));
        }

        let mut exits = self.exits;
        if exits.is_empty() {
            debug!(pipeline = %name, "No exits configured, adding default exit [{DEFAULT_SUCCESS_EXIT_NAME}]");
            exits.push(PipeLineExit::success(DEFAULT_SUCCESS_EXIT_NAME));
        }
        check_exit_codes(&name, &exits, warnings);
        let default_exit = exits
            .iter()
            .find(|e| e.state == ExitState::Success)
            .unwrap_or(&exits[0])
            .name
            .clone();

        let mut pipes = self.pipes;
        let next_names: Vec<Option<String>> = (0..pipes.len())
            .map(|i| pipes.get(i + 1).map(|p| p.name.clone()))
            .collect();
        for (spec, next) in pipes.iter_mut().zip(next_names) {
            add_global_forwards(spec, &self.global_forwards);
            if !spec.has_success_forward() {
                let path = next.unwrap_or_else(|| {
                    warnings.add(
                        format!("pipeline [{name}] pipe [{}]", spec.name),
                        format!("no success forward declared, forwarding to exit [{default_exit}]"),
                    );
                    default_exit.clone()
                });
                spec.forwards.insert(SUCCESS_FORWARD_NAME.to_string(), PipeForward::success(path));
            }
        }

        let first_pipe = self.first_pipe.unwrap_or_else(|| pipes[0].name.clone());
        if !pipes.iter().any(|p| p.name == first_pipe) {
            return Err(ConfigurationError::new(format!(
                "Pipeline [{name}] first pipe [{first_pipe}] is not a declared pipe"
            ))
            .with_pipes(vec![first_pipe.clone()])
            .with_error_info(ErrorInfo::new(
                "CONFIG-003-FIRST_PIPE",
                format!("First pipe '{first_pipe}' not found"),
            )));
        }

        let mut input_validator = self.input_validator;
        let mut input_wrapper = self.input_wrapper;
        let mut output_validator = self.output_validator;
        let mut output_wrapper = self.output_wrapper;
        for (slot, success_path) in [
            (&mut input_validator, &first_pipe),
            (&mut input_wrapper, &first_pipe),
            (&mut output_validator, &default_exit),
            (&mut output_wrapper, &default_exit),
        ] {
            if let Some(spec) = slot {
                spec.validate()?;
                add_global_forwards(spec, &self.global_forwards);
                if !spec.has_success_forward() {
                    spec.forwards.insert(
                        SUCCESS_FORWARD_NAME.to_string(),
                        PipeForward::success(success_path.clone()),
                    );
                }
            }
        }

        let pipe_index: HashMap<String, usize> =
            pipes.iter().enumerate().map(|(i, p)| (p.name.clone(), i)).collect();
        let exit_names: HashSet<&str> = exits.iter().map(|e| e.name.as_str()).collect();
        let specs = pipes.iter().chain(
            [&input_validator, &input_wrapper, &output_validator, &output_wrapper]
                .into_iter()
                .flatten(),
        );
        for spec in specs {
            let mut forwards: Vec<&PipeForward> = spec.forwards.values().collect();
            forwards.sort_by(|a, b| a.name.cmp(&b.name));
            for forward in forwards {
                if !exit_names.contains(forward.path.as_str()) && !pipe_index.contains_key(&forward.path) {
                    return Err(ConfigurationError::new(format!(
                        "Pipeline [{name}] forward [{}] of pipe [{}] points to [{}], which is neither a pipe nor an exit",
                        forward.name, spec.name, forward.path
                    ))
                    .with_pipes(vec![spec.name.clone()])
                    .with_error_info(
                        ErrorInfo::new(
                            "CONFIG-004-UNRESOLVED_FORWARD",
                            format!("Forward '{}' cannot be resolved", forward.name),
                        )
                        .with_context_entry("path", forward.path.clone()),
                    ));
                }
            }
            check_unit_settings(
                &format!("pipeline [{name}] pipe [{}]", spec.name),
                spec.locker.is_some(),
                spec.max_threads,
                spec.transaction,
                warnings,
            );
        }
        check_unit_settings(
            &format!("pipeline [{name}]"),
            self.locker.is_some(),
            self.max_threads,
            self.transaction,
            warnings,
        );

        debug!(pipeline = %name, pipes = pipes.len(), exits = exits.len(), first_pipe = %first_pipe, "Pipeline built");
        let statistics = PipeLineStatistics::new(&name);
        Ok(PipeLine {
            name,
            pipes,
            pipe_index,
            exits,
            first_pipe,
            input_validator,
            output_validator,
            input_wrapper,
            output_wrapper,
            locker: self.locker,
            lock_busy_policy: self.lock_busy_policy,
            transaction: self.transaction,
            max_threads: self.max_threads,
            cache: self.cache,
            hide_regex: self.hide_regex,
            transform_null_message: self.transform_null_message,
            run_before_on_empty_input: self.run_before_on_empty_input,
            exit_handlers: self.exit_handlers,
            statistics,
            throttle: LazyThrottle::default(),
        })
    }
}

fn add_global_forwards(spec: &mut PipeSpec, global: &[PipeForward]) {
    for forward in global {
        spec.forwards
            .entry(forward.name.clone())
            .or_insert_with(|| forward.clone());
    }
}

fn check_exit_codes(pipeline: &str, exits: &[PipeLineExit], warnings: &ConfigurationWarnings) {
    let mut seen: HashMap<i32, &str> = HashMap::new();
    for exit in exits.iter().filter(|e| e.exit_code != 0) {
        if let Some(other) = seen.insert(exit.exit_code, &exit.name) {
            warnings.add(
                format!("pipeline [{pipeline}]"),
                format!(
                    "exit code [{}] is used by both exit [{other}] and exit [{}]",
                    exit.exit_code, exit.name
                ),
            );
        }
    }
}

fn check_unit_settings(
    source: &str,
    has_locker: bool,
    max_threads: i32,
    transaction: TransactionAttributes,
    warnings: &ConfigurationWarnings,
) {
    if has_locker && max_threads > 0 {
        warnings.add(
            source,
            "has both a locker and a concurrency limit; the locker already serialises runs",
        );
    }
    if transaction.timeout.is_some() && !transaction.attribute.is_transactional() {
        warnings.add(
            source,
            format!(
                "transaction timeout is set but attribute [{}] starts no transaction",
                transaction.attribute
            ),
        );
    }
}
