//! Process-wide tracing setup shared by the queue binaries.

/// Initialize structured logging with the `info` default filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Initialize structured logging, falling back to `default_filter` when
/// `RUST_LOG` is unset or invalid.
pub fn init_with(default_filter: &str) {
    tracing::init(default_filter);
}

/// Subscriber construction (filters, JSON formatting).
pub mod tracing;
