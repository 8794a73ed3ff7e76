//! Tracing/logging initialization for worker processes.

use tracing_subscriber::EnvFilter;

/// Initialize process-wide tracing.
///
/// `RUST_LOG` controls the filter (default `info`). `MANIFOLD_LOG_FORMAT`
/// selects the output shape: `json` (the default, for log shippers) or
/// `pretty` for local runs. Safe to call more than once; later calls are
/// no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    match std::env::var("MANIFOLD_LOG_FORMAT").as_deref() {
        Ok("pretty") => {
            let _ = builder.pretty().try_init();
        }
        _ => {
            let _ = builder.json().try_init();
        }
    }
}
