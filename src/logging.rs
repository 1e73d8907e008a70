//! Structured logging setup
//!
//! `RUST_LOG` wins over the configured filter when set.

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` if present and valid, else `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global `fmt` subscriber. Fails if one is already installed.
pub fn init(default_directive: &str) -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())
}
