//! Engine configuration and configuration-time warnings.

mod warnings;

pub use warnings::{ConfigurationWarning, ConfigurationWarnings};

use crate::errors::{ConfigurationError, ErrorInfo, PipeflowError};
use crate::locking::LockBusyPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default threshold above which message sizes are reported: 30 MiB.
pub const DEFAULT_MESSAGE_SIZE_WARN_BYTES: u64 = 30 * 1024 * 1024;

/// Default maximum nesting of sub-pipeline calls.
pub const DEFAULT_MAX_SUBPIPELINE_DEPTH: u32 = 5;

fn default_message_size_warn() -> Option<u64> {
    Some(DEFAULT_MESSAGE_SIZE_WARN_BYTES)
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_SUBPIPELINE_DEPTH
}

fn default_originator() -> String {
    "pipeflow".to_string()
}

fn default_pipeline_lock_policy() -> LockBusyPolicy {
    LockBusyPolicy::Skip
}

fn default_pipe_lock_policy() -> LockBusyPolicy {
    LockBusyPolicy::Fail
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Messages larger than this are reported. `None` disables the check.
    #[serde(default = "default_message_size_warn")]
    pub message_size_warn_bytes: Option<u64>,

    /// Log the result of every pipe at debug level (masked).
    #[serde(default)]
    pub log_intermediary_results: bool,

    /// Maximum nesting of sub-pipeline calls.
    #[serde(default = "default_max_depth")]
    pub max_subpipeline_depth: u32,

    /// Name reported as originator in formatted error messages.
    #[serde(default = "default_originator")]
    pub originator: String,

    /// What a pipeline does when its lock is busy.
    #[serde(default = "default_pipeline_lock_policy")]
    pub pipeline_lock_busy_policy: LockBusyPolicy,

    /// What a pipe does when its lock is busy.
    #[serde(default = "default_pipe_lock_policy")]
    pub pipe_lock_busy_policy: LockBusyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_size_warn_bytes: default_message_size_warn(),
            log_intermediary_results: false,
            max_subpipeline_depth: default_max_depth(),
            originator: default_originator(),
            pipeline_lock_busy_policy: default_pipeline_lock_policy(),
            pipe_lock_busy_policy: default_pipe_lock_policy(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the message size warning threshold.
    #[must_use]
    pub const fn with_message_size_warn(mut self, bytes: Option<u64>) -> Self {
        self.message_size_warn_bytes = bytes;
        self
    }

    /// Enables logging of every pipe result.
    #[must_use]
    pub const fn with_log_intermediary_results(mut self, enabled: bool) -> Self {
        self.log_intermediary_results = enabled;
        self
    }

    /// Sets the maximum sub-pipeline depth.
    #[must_use]
    pub const fn with_max_subpipeline_depth(mut self, depth: u32) -> Self {
        self.max_subpipeline_depth = depth;
        self
    }

    /// Sets the originator name.
    #[must_use]
    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = originator.into();
        self
    }

    /// Sets the lock-busy policies for pipelines and pipes.
    #[must_use]
    pub const fn with_lock_busy_policies(
        mut self,
        pipeline: LockBusyPolicy,
        pipe: LockBusyPolicy,
    ) -> Self {
        self.pipeline_lock_busy_policy = pipeline;
        self.pipe_lock_busy_policy = pipe;
        self
    }

    /// Parses a JSON document; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PipeflowError> {
        serde_json::from_str(json).map_err(|err| {
            ConfigurationError::new(format!("Invalid engine configuration: {err}"))
                .with_error_info(
                    ErrorInfo::new("CONFIG-008-PARSE", "Engine configuration could not be parsed")
                        .with_context_entry("line", err.line().to_string())
                        .with_context_entry("column", err.column().to_string()),
                )
                .into()
        })
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipeflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String, PipeflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
