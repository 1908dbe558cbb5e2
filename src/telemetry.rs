//! Tracing/logging initialization
//!
//! Logs go to stderr so that CSV reports on stdout stay machine-readable.
//! Filtering follows `RUST_LOG` and defaults to `info`.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, one event per line
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize tracing/logging for the process
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
    };
}
