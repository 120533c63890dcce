//! Test logging setup

use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for the dataplane crates.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,dataplane_txn=debug,dataplane_reconcile=debug,dataplane_http=debug")
    });

    // a second call in the same test binary is a no-op
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .try_init();
}
