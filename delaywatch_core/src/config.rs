//! Watcher tuning.
//!
//! Defaults are tuned for a 20 Hz tick. Every value can be overridden per
//! scheduler or per request.

use crate::error::WatchError;
use crate::zone::{DetectionZone, Neighborhood};
use delaywatch_env::Coordinate;
use serde::{Deserialize, Serialize};

/// Hard cap on cells sampled per watcher per tick.
pub const MAX_NEIGHBORHOOD_CELLS: usize = 4096;

/// Where to look for an anchor when no changed cell is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackScan {
    /// Columns within this horizontal radius of the last known cell are scanned
    pub column_radius: i32,

    /// How many cells downward each column is scanned
    pub depth: i32,

    /// Straight-down ground scan depth when no column hit
    pub ground_depth: i32,
}

impl Default for FallbackScan {
    fn default() -> Self {
        Self {
            column_radius: 2,
            depth: 6,
            ground_depth: 32,
        }
    }
}

/// Defaults applied to every watcher a scheduler creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Detection zone (default: 1 horizontal, 4 below)
    pub zone: DetectionZone,

    /// Neighborhood radius for object watchers (default: 3 -> 7x7 columns)
    pub neighborhood_radius: i32,

    /// Hard timeout in ticks (default: 1200 = 60s at 20 Hz)
    pub timeout_ticks: u32,

    /// Ticks between trigger and the resume-pending stage (default: 1)
    pub stage_one_delay: u32,

    /// Ticks between resume-pending and the actual resume (default: 10)
    pub stage_two_delay: u32,

    /// Stage-one delay for region watchers that share a guard (default: 6)
    pub passive_stage_one_delay: u32,

    /// Ticks to keep looking after the tracked object disappears (default: 3)
    pub grace_ticks: u32,

    /// |vy| below this counts as "stopped falling" (default: 0.02 cells/tick)
    pub settle_velocity: f64,

    /// Anchor fallback scan
    pub fallback: FallbackScan,

    /// Emit the "still scanning" debug line every N ticks (default: 5)
    pub log_every: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            zone: DetectionZone::default(),
            neighborhood_radius: 3,
            timeout_ticks: 20 * 60,
            stage_one_delay: 1,
            stage_two_delay: 10,
            passive_stage_one_delay: 6,
            grace_ticks: 3,
            settle_velocity: 0.02,
            fallback: FallbackScan::default(),
            log_every: 5,
        }
    }
}

impl WatchConfig {
    /// Checks that the configured geometry is sane and bounded.
    pub fn validate(&self) -> Result<(), WatchError> {
        validate_geometry(self.neighborhood_radius, &self.zone)?;
        let scan = self.fallback;
        if scan.column_radius < 0 || scan.depth < 0 || scan.ground_depth < 0 {
            return Err(WatchError::InvalidZone(format!(
                "fallback scan must be non-negative, got radius={} depth={} ground={}",
                scan.column_radius, scan.depth, scan.ground_depth
            )));
        }
        if !self.settle_velocity.is_finite() || self.settle_velocity < 0.0 {
            return Err(WatchError::InvalidZone(format!(
                "settle velocity must be a non-negative number, got {}",
                self.settle_velocity
            )));
        }
        Ok(())
    }
}

/// Validates a neighborhood radius against a zone and the sampling cap.
pub(crate) fn validate_geometry(radius: i32, zone: &DetectionZone) -> Result<(), WatchError> {
    if radius < 0 {
        return Err(WatchError::InvalidRadius(radius));
    }
    if zone.horizontal < 0 || zone.vertical_below < 0 {
        return Err(WatchError::InvalidZone(format!(
            "zone extents must be non-negative, got horizontal={} below={}",
            zone.horizontal, zone.vertical_below
        )));
    }
    let cells = Neighborhood::covering(Coordinate::ORIGIN, radius, zone).len();
    if cells > MAX_NEIGHBORHOOD_CELLS {
        return Err(WatchError::NeighborhoodTooLarge {
            cells,
            max: MAX_NEIGHBORHOOD_CELLS,
        });
    }
    Ok(())
}
