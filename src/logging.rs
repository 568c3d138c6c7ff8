//! Tracing initialisation for host applications
//!
//! The crate itself only emits `tracing` events (SQL at `debug`, strategy
//! decisions at `debug`, search outages at `warn`). Services embedding it can
//! call [`init_tracing`] instead of wiring a subscriber by hand.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for the console layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Human readable multi-line output
    Pretty,
}

/// Install a global subscriber honouring `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` when a subscriber was already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.is_ok()
}
