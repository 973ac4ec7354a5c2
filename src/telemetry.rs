//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber writing to stderr
///
/// `RUST_LOG` wins over `default_filter`. Later calls are no-ops, so both
/// binaries and tests may call this freely.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
