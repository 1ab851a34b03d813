//! Detection zones and sampling neighborhoods.
//!
//! A watcher samples a bounded box of cells around its reference point every
//! tick, but only changes inside the (smaller) detection zone may trigger it:
//!
//! ```text
//!          y
//!          ^       . . . . .    <- sampled, recorded, never triggers
//!          |       . . R . .    <- reference row (dy = 0) is in the zone
//!          |       . # # # .
//!          |       . # # # .    <- zone: |dx|,|dz| <= H and 0 <= down <= V
//!          |       . . . . .
//!          +-----------------> x
//! ```

use delaywatch_env::Coordinate;
use serde::{Deserialize, Serialize};

/// Geometric filter deciding whether a changed cell is relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionZone {
    /// Maximum horizontal offset on each of x and z
    pub horizontal: i32,

    /// Maximum depth below the reference that still counts
    pub vertical_below: i32,
}

impl DetectionZone {
    /// Creates a zone with the given horizontal reach and depth.
    pub const fn new(horizontal: i32, vertical_below: i32) -> Self {
        Self {
            horizontal,
            vertical_below,
        }
    }

    /// Returns true if `at` is relevant relative to `reference`.
    ///
    /// Cells above the reference never qualify; the reference's own level does.
    pub fn contains(&self, at: Coordinate, reference: Coordinate) -> bool {
        let dx = (at.x - reference.x).abs();
        let dz = (at.z - reference.z).abs();
        let down = reference.y - at.y;

        dx <= self.horizontal && dz <= self.horizontal && down >= 0 && down <= self.vertical_below
    }
}

impl Default for DetectionZone {
    fn default() -> Self {
        Self::new(1, 4)
    }
}

/// The box of cells a watcher samples around a center.
///
/// Spans `radius` (or the zone's horizontal reach, if wider) sideways and
/// upward, and reaches down far enough to cover the detection zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighborhood {
    pub center: Coordinate,
    pub radius: i32,
    pub depth: i32,
}

impl Neighborhood {
    /// Neighborhood around `center` that covers `zone`.
    pub fn covering(center: Coordinate, radius: i32, zone: &DetectionZone) -> Self {
        let radius = radius.max(zone.horizontal);
        Self {
            center,
            radius,
            depth: radius.max(zone.vertical_below),
        }
    }

    /// Number of cells sampled for the given radius and depth.
    pub fn cell_count(radius: i32, depth: i32) -> usize {
        let side = (2 * radius.max(0) + 1) as usize;
        let height = (radius.max(0) + depth.max(0) + 1) as usize;
        side * side * height
    }

    /// Number of cells in this neighborhood.
    pub fn len(&self) -> usize {
        Self::cell_count(self.radius, self.depth)
    }

    /// Always false; a neighborhood holds at least its center.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates cells top to bottom, then x, then z.
    ///
    /// The order is fixed so that baselines and tie-breaks are deterministic.
    pub fn cells(&self) -> impl Iterator<Item = Coordinate> {
        let r = self.radius;
        let center = self.center;
        (-self.depth..=r).rev().flat_map(move |dy| {
            (-r..=r).flat_map(move |dx| (-r..=r).map(move |dz| center.offset(dx, dy, dz)))
        })
    }
}
