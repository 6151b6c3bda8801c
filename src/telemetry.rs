// =============================================================================
// Telemetry initialisation
// =============================================================================

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber. Log level is controlled by
/// `RUST_LOG` (defaults to `info` when unset).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}
