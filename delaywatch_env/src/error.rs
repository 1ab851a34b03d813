//! Error types for the delaywatch environment abstraction.

use crate::types::Coordinate;
use thiserror::Error;

/// Errors that can occur when the core talks to its environment.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Cell state query failed (chunk unloaded, backend hiccup, etc.)
    #[error("Sampling failed at {at}: {reason}")]
    Sampling { at: Coordinate, reason: String },

    /// The resolver's resume action failed
    #[error("Resolver error: {0}")]
    Resolver(String),
}

impl EnvError {
    /// Creates a sampling error.
    pub fn sampling(at: Coordinate, reason: impl Into<String>) -> Self {
        Self::Sampling {
            at,
            reason: reason.into(),
        }
    }

    /// Creates a resolver error.
    pub fn resolver(msg: impl Into<String>) -> Self {
        Self::Resolver(msg.into())
    }
}
