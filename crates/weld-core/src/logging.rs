//! Logging helpers.
//!
//! Production binaries install their own subscriber; tests call
//! [`init_test_logging`] to get `RUST_LOG`-filtered output captured per
//! test.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Reads the filter from `RUST_LOG` and writes through the test writer so
/// output is captured with the owning test. Safe to call from every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("still alive after double init");
    }
}
