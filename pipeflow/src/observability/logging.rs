//! Subscriber initialisation for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Installs a human-readable `tracing` subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `level`. Does nothing if a
/// global subscriber is already installed.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}

/// Installs a JSON `tracing` subscriber, one object per line.
pub fn init_json(level: &str) {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(level))
        .with_current_span(false)
        .try_init();
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init_json("info");
        tracing::info!(component = "logging", "subscriber installed");
    }
}
