//! Process-wide logging setup.
//!
//! Every entry point is idempotent: the first successful call installs the
//! global subscriber and later calls do nothing.

pub mod subscriber;

pub use subscriber::{Format, init_with};

/// JSON logs filtered by `RUST_LOG` (default `info`).
pub fn init() {
    init_with(Format::Json, "info");
}

/// Human-readable logs for local runs.
pub fn init_pretty() {
    init_with(Format::Pretty, "info");
}

/// Compact logs captured by the test harness; defaults to `debug`.
pub fn init_for_tests() {
    subscriber::init_test_writer("debug");
}
