//! Process-wide tracing setup shared by every stockledger binary.

/// Initialize structured logging for the process.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber and filter configuration.
pub mod tracing;
