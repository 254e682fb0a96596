//! Logging and observability
//!
//! Session history as JSONL, plus the `tracing` subscriber used by the
//! binary for diagnostics.

pub mod jsonl;

pub use jsonl::{JsonlLogger, SessionRecord, SessionStatus};

use tracing_subscriber::EnvFilter;

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
