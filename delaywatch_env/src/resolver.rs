//! The one-shot resolution action invoked when a watcher succeeds.

use crate::error::EnvError;
use crate::types::{Coordinate, WatcherId};
use serde::{Deserialize, Serialize};

/// Why a watcher resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionCause {
    /// A new non-empty cell appeared inside the detection zone
    CellChanged,
    /// The tracked object was removed and the grace period ran out
    ObjectVanished,
    /// The tracked object stopped falling on top of a solid cell
    ObjectSettled,
    /// The hard timeout elapsed
    Timeout,
    /// Nothing worth watching; resolved on the spot
    Immediate,
}

impl ResolutionCause {
    /// Short name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionCause::CellChanged => "cell_changed",
            ResolutionCause::ObjectVanished => "object_vanished",
            ResolutionCause::ObjectSettled => "object_settled",
            ResolutionCause::Timeout => "timeout",
            ResolutionCause::Immediate => "immediate",
        }
    }
}

impl std::fmt::Display for ResolutionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Context handed to [`Resolver::resume`].
///
/// `anchor` is the cell the resumed action should treat as its hit location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeContext {
    /// Watcher that won the right to resolve (`None` for immediate resolution)
    pub watcher: Option<WatcherId>,

    /// Resolution anchor
    pub anchor: Coordinate,

    /// What triggered resolution
    pub cause: ResolutionCause,

    /// Scheduler tick at which resume was called
    pub tick: u64,
}

/// External one-shot action.
///
/// The core guarantees at most one call per logical event (guard token plus
/// terminal-state checks). Implementations should still be self-guarding.
pub trait Resolver: Send + Sync {
    /// Resumes the deferred action.
    ///
    /// # Returns
    /// * `Ok(())` - The action ran
    /// * `Err(EnvError::Resolver)` - The action failed; it is not retried
    fn resume(&self, context: &ResumeContext) -> Result<(), EnvError>;
}
