//! Concurrency limiting for pipes and pipelines.

mod throttle;

pub use throttle::{ConcurrencyThrottle, LazyThrottle, ThrottlePermit};
