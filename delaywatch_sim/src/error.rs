//! Error types for the simulation harness.

use delaywatch_core::WatchError;
use thiserror::Error;

/// Errors surfaced by the simulator outside a scenario run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Config or export file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or export JSON is malformed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Loaded watch config failed validation
    #[error("Invalid config: {0}")]
    Config(#[from] WatchError),
}
