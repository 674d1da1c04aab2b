#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// A test helper macro for asserting that a string contains a substring,
/// with a useful failure message.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value = $haystack.to_string();
        let needle_value = $needle.to_string();
        assert!(
            haystack_value.contains(&needle_value),
            "Can not find \"{}\" in \"{}\"",
            needle_value,
            haystack_value
        );
    };
}

/// The inverse of [`assert_contains`].
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack_value = $haystack.to_string();
        let needle_value = $needle.to_string();
        assert!(
            !haystack_value.contains(&needle_value),
            "Found unexpected \"{}\" in \"{}\"",
            needle_value,
            haystack_value
        );
    };
}

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the RUST_LOG environment variable is set.
/// Intended to be called at the start of tests that want log output.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Registers a global tracing subscriber reading its filter from RUST_LOG.
/// Safe to call from multiple tests; only the first call installs it.
pub fn start_logging() {
    LOG_SETUP.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}
