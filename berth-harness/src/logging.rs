//! Logging initialization for berth.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `BerthConfig`. `RUST_LOG` wins over the configured level when set.

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use berth_core::config::GeneralConfig;

/// Errors raised while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unknown log format '{0}', expected 'json' or 'pretty'")]
    UnknownFormat(String),

    #[error("failed to initialize tracing subscriber: {0}")]
    Init(String),
}

/// Initialize the global tracing subscriber.
///
/// Must be called at most once per process, before any tracing macros are used.
/// Events go to stderr so stdout stays free for command and test output.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (CI logs)
/// * `"pretty"` - Human-readable colored output (local runs)
pub fn init_tracing(config: &GeneralConfig) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        other => return Err(LoggingError::UnknownFormat(other.to_owned())),
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Install a subscriber that writes through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // another subscriber may already be installed by the test binary
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}
