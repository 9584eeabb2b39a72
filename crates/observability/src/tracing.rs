//! JSON log output filtered by `RUST_LOG`.
//!
//! Workflows log one `info` event per committed change set and a `warn` per
//! commit conflict. Set `RUST_LOG=stockledger_infra=debug` to also see the
//! per-line FIFO allocations and per-lot receptions.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

pub fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global JSON subscriber. Later calls leave the first one in place.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}
