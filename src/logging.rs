//! Logging setup
//!
//! The library only emits through the `log` facade. Binaries and tests call
//! [`init`] to route records to `env_logger` (filtered by `RUST_LOG`).

use std::sync::Once;

static INIT: Once = Once::new();

/// Install `env_logger` once; later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .format_timestamp_millis()
        .try_init();
    });
}

/// Like [`init`], but captures output for the test harness.
pub fn init_for_tests() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
