//! Tracing setup. Each linker pass is wrapped in a span so that running with
//! e.g. `RIVET_LOG=info` reports what the linker spent its time on.

use tracing_subscriber::EnvFilter;

pub(crate) const LOG_ENV_VAR: &str = "RIVET_LOG";

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
