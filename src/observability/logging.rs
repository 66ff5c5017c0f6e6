//! Structured logging.
//!
//! The library only emits `tracing` events; binaries call [`init_logging`]
//! once at startup to install a subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `config.log_level`. Returns an error if a global
/// subscriber is already set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(build_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}
