//! Process-wide tracing setup for ledger services and tests.

/// Subscriber installation (JSON output, `RUST_LOG` filtering).
pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init_with_default};

/// Install the JSON subscriber with the `RUST_LOG` filter (default `info`).
///
/// Safe to call multiple times; only the first call installs anything.
pub fn init() {
    tracing::init_with_default(DEFAULT_FILTER);
}

/// Compact, human-readable output captured by the test harness.
///
/// Safe to call from every test.
pub fn init_for_tests() {
    tracing::init_test_writer();
}
