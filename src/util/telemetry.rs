//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Filter applied when neither `RUST_LOG` nor `.env` provide one.
pub const DEFAULT_FILTER: &str = "fix_dispatch=info";

/// Initialize tracing. Users can install their own subscriber; this helper
/// loads `.env` (if any) and installs an env-filtered fmt subscriber when
/// none is set yet.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = dotenvy::dotenv();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}
