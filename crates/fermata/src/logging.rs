//! Logging initialization for fermata.
//!
//! The pool itself only emits `tracing` events: connection create, checkout,
//! release and destroy at `debug`, pool open/teardown at `info`, failed
//! replacements at `warn` and a dead liveness monitor at `error`. Nothing is
//! printed until the application installs a subscriber, which is what the
//! helpers below do.
//!
//! The level is controlled by the `RUST_LOG` environment variable:
//!
//! ```bash
//! # Follow every checkout and eviction
//! RUST_LOG=fermata=debug cargo run
//!
//! # Only hear about failed replacements and monitor failures (production)
//! RUST_LOG=warn cargo run
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with the `info` level unless `RUST_LOG` says otherwise.
///
/// Calling it more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize logging with a specific default level.
///
/// `RUST_LOG` still wins when it is set.
///
/// # Example
///
/// ```rust,no_run
/// fermata::logging::init_logging_with_level("debug");
/// ```
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init();
}

/// Initialize JSON-formatted logging for log aggregation systems.
pub fn init_logging_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();
}
