//! Structured logging setup, mirroring the teacher's
//! `tracing_subscriber::fmt::init()` call in its binary entry points.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
