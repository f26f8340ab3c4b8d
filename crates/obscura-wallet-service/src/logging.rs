//! Logging initialization
//!
//! The engine itself only emits `tracing` events; embedders call [`init`]
//! once to install a subscriber. The filter comes from `RUST_LOG` when set,
//! falling back to `info`.

use tracing_subscriber::EnvFilter;

/// Output format for the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber is already installed, which makes
/// repeated calls (tests, multiple services in one process) harmless.
pub fn init(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}
