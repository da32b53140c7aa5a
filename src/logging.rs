//! Log output for binaries and tests.
//!
//! The library only emits `tracing` events; nothing is printed until a
//! subscriber is installed. [`init`] installs a plain `fmt` subscriber.

use tracing_subscriber::EnvFilter;

/// Installs a formatted stdout subscriber filtered by `filter`
/// (`EnvFilter` syntax, e.g. `"deferred_pubsub=debug"`).
///
/// `RUST_LOG` takes precedence when set. Only the first call in a process
/// has an effect.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber installed earlier (by a test harness or a previous call) wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}
