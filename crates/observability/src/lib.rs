//! Process-wide logging setup for services embedding the pub/sub adapter.

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize human-readable logging, for local runs and tests.
pub fn init_pretty() {
    tracing::init_pretty();
}

/// Tracing subscriber configuration.
pub mod tracing;
