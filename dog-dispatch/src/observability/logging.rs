use tracing_subscriber::EnvFilter;

use crate::{QueueError, QueueResult};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`
/// (falling back to `default_filter`).
pub fn init_tracing(default_filter: &str) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| QueueError::Config(format!("invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| QueueError::Internal(format!("tracing already initialised: {}", e)))
}

/// Same as [`init_tracing`] with JSON output
pub fn init_json_tracing(default_filter: &str) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| QueueError::Config(format!("invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| QueueError::Internal(format!("tracing already initialised: {}", e)))
}
