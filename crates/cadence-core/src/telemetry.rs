use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

/// Initialize the tracing subscriber for structured logging.
///
/// - `auto`: pretty-printed in debug builds, JSON in release builds
/// - `pretty` / `json`: forced regardless of build profile
///
/// The log level is controlled by the `RUST_LOG` environment variable,
/// defaulting to `info`.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = match config.log_format {
        LogFormat::Auto => !cfg!(debug_assertions),
        LogFormat::Pretty => false,
        LogFormat::Json => true,
    };

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
