//! Process-wide tracing setup. Library code never calls this; it is the
//! responsibility of whatever binary or test harness embeds this crate.

use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber::fmt` subscriber from `RUST_LOG`
/// (default directive `info`). Safe to call more than once — subsequent
/// calls are no-ops, matching `try_init()`'s own idempotence.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
