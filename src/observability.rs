//! Tracing setup for the binaries
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

pub type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Install a global fmt subscriber writing to stderr.
///
/// Stdout stays free for command output. An unparseable filter falls back
/// to `info`.
pub fn init_tracing(config: &LogConfig) -> InitResult {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
