//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` wins over `config.level`. Safe to call multiple times
/// (subsequent calls are no-ops); returns whether this call installed it.
pub fn init(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.pretty().try_init().is_ok()
    }
}
