//! Error types for the watcher core.

use delaywatch_env::{EnvError, WatcherId};
use thiserror::Error;

/// Errors returned by the scheduler's public operations.
///
/// Failures that happen *inside* a watcher's tick never surface here; they are
/// logged and contained by the watcher itself.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Neighborhood radius is negative
    #[error("Invalid neighborhood radius: {0}")]
    InvalidRadius(i32),

    /// Detection zone or fallback geometry is malformed
    #[error("Invalid detection zone: {0}")]
    InvalidZone(String),

    /// The requested neighborhood would sample too many cells per tick
    #[error("Neighborhood too large: {cells} cells (max {max})")]
    NeighborhoodTooLarge { cells: usize, max: usize },

    /// The scheduler holds no watcher with this id
    #[error("Unknown watcher: {0}")]
    UnknownWatcher(WatcherId),

    /// Environment failure outside a watcher tick
    #[error(transparent)]
    Env(#[from] EnvError),
}
