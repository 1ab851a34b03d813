//! delaywatch Core - Deferred-Condition Watcher Scheduler
//!
//! Watches a small region of a voxel world (or a moving object in it) and
//! fires a one-shot resolution once something new lands there:
//! 1. **Detection**: per-watcher baselines diffed against a bounded neighborhood
//!    every tick, filtered through a directional detection zone
//! 2. **Staging**: two explicit countdowns between trigger and resolution, so
//!    co-spawned watchers get a deterministic window to agree on a winner
//! 3. **At-most-once**: a shared [`GuardToken`] with an atomic claim
//!
//! Everything runs on the caller's thread; [`Scheduler::tick`] steps each live
//! watcher exactly once in insertion order.

pub mod baseline;
pub mod config;
pub mod error;
pub mod guard;
pub mod impact;
pub mod scheduler;
pub mod watcher;
pub mod zone;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use baseline::{sample_neighborhood, Baseline, BaselineDelta, Sample};
pub use config::{FallbackScan, WatchConfig, MAX_NEIGHBORHOOD_CELLS};
pub use error::WatchError;
pub use guard::GuardToken;
pub use impact::{Impact, ImpactConfig, ImpactOutcome, ImpactPlanner};
pub use scheduler::{Scheduler, TickReport, WatchRequest};
pub use watcher::{TickOutcome, WatchMode, WatchSettings, WatchTarget, Watcher, WatcherState};
pub use zone::{DetectionZone, Neighborhood};
