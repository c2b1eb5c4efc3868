//! Observability utilities.

pub mod logging;
mod timer;

pub use timer::SpanTimer;
