//! Mock pipes and resources for testing.

use crate::core::{PipeRunResult, SUCCESS_FORWARD_NAME};
use crate::errors::PipeRunError;
use crate::message::{Closeable, Message};
use crate::pipes::{Pipe, PipeContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A pipe with a configurable output and forward that counts its calls.
///
/// Echoes its input on `success` until told otherwise.
#[derive(Debug)]
pub struct MockPipe {
    output: Mutex<Option<String>>,
    forward: Mutex<String>,
    call_count: AtomicUsize,
}

impl Default for MockPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipe {
    /// Creates an echoing mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            output: Mutex::new(None),
            forward: Mutex::new(SUCCESS_FORWARD_NAME.to_string()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Sets the text to return instead of the input.
    pub fn set_output(&self, output: impl Into<String>) {
        *self.output.lock() = Some(output.into());
    }

    /// Sets the name of the forward to take.
    pub fn set_forward(&self, forward: impl Into<String>) {
        *self.forward.lock() = forward.into();
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Pipe for MockPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let forward = ctx.forward(&self.forward.lock().clone())?;
        let result = match self.output.lock().clone() {
            Some(text) => Message::text(text),
            None => message,
        };
        Ok(PipeRunResult::new(result, forward))
    }
}

/// A pipe that always fails.
#[derive(Debug, Clone)]
pub struct FailingPipe {
    error: String,
}

impl FailingPipe {
    /// Creates a pipe failing with `error`.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

#[async_trait]
impl Pipe for FailingPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, _message: Message) -> Result<PipeRunResult, PipeRunError> {
        Err(PipeRunError::pipe_failed(ctx.pipe_name(), &self.error))
    }
}

/// An echoing pipe that sleeps first and tracks how many calls overlap.
#[derive(Debug)]
pub struct SlowPipe {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowPipe {
    /// Creates a pipe sleeping `delay` per call.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a pipe sleeping `ms` milliseconds per call.
    #[must_use]
    pub const fn with_delay_ms(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Calls in progress right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Completed and running calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipe for SlowPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(PipeRunResult::new(message, ctx.success_forward()?))
    }
}

/// An echoing pipe that records the text of every input.
#[derive(Debug, Default)]
pub struct RecordingPipe {
    inputs: Mutex<Vec<String>>,
}

impl RecordingPipe {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs seen so far, oldest first.
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    /// Clears the recorded inputs.
    pub fn clear(&self) {
        self.inputs.lock().clear();
    }
}

#[async_trait]
impl Pipe for RecordingPipe {
    async fn do_pipe(&self, ctx: &PipeContext<'_>, message: Message) -> Result<PipeRunResult, PipeRunError> {
        message.preserve()?;
        self.inputs.lock().push(message.as_string_or_empty()?);
        Ok(PipeRunResult::new(message, ctx.success_forward()?))
    }
}

/// A resource counting how often it is closed.
#[derive(Debug, Default)]
pub struct CountingCloseable {
    closes: AtomicUsize,
    fail: bool,
}

impl CountingCloseable {
    /// Creates a resource that closes cleanly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resource whose close reports an error (after counting).
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            closes: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// Number of close calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Closeable for CountingCloseable {
    fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("close failed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "counting resource".to_string()
    }
}
