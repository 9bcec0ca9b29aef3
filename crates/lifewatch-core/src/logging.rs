#![forbid(unsafe_code)]

//! JSON log output for deployments.

use tracing_subscriber::EnvFilter;

/// Install a global JSON subscriber filtered by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Fails if a global subscriber has already been set.
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
