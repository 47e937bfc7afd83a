//! Tracing subscriber installation.
//!
//! Services log JSON lines filtered by `RUST_LOG` (default `info`). Tests
//! get human-readable output routed through the test harness writer so it
//! only shows for failing tests.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the JSON subscriber. Later calls are no-ops.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Like [`init`], with a different fallback when `RUST_LOG` is unset.
pub fn init_with_filter(default: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .try_init();
}

/// Compact output captured by the test harness. Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}
