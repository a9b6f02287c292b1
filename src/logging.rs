//! # Logging setup.
//!
//! Structured logging through `tracing`, filtered by the daemon's `verbose`
//! knob (0 = everything, 7 = fatal only). The original syslog ladder had
//! eight rungs; tracing has five levels, so 4..7 collapse onto ERROR.
//! A `RUST_LOG` environment variable overrides the knob entirely.

use tracing_subscriber::EnvFilter;

/// Maps `verbose` 0..7 onto a tracing filter directive.
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        _ => "error",
    }
}

/// Installs the global subscriber.
///
/// Safe to call more than once; later calls are no-ops (relevant under test
/// harnesses that initialize per-test).
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
