//! Common types for the delaywatch environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integer cell coordinate in the watched world.
///
/// `y` is the vertical axis; "below" means decreasing `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    /// The world origin, used as the last-resort anchor.
    pub const ORIGIN: Coordinate = Coordinate { x: 0, y: 0, z: 0 };

    /// Creates a coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns this coordinate shifted by the given deltas.
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    /// The cell `n` steps below.
    pub fn below(&self, n: i32) -> Self {
        self.offset(0, -n, 0)
    }

    /// The cell `n` steps above.
    pub fn above(&self, n: i32) -> Self {
        self.offset(0, n, 0)
    }

    /// Cell containing a continuous position (floor on each axis).
    pub fn containing(x: f64, y: f64, z: f64) -> Self {
        Self::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    /// Squared euclidean distance, used for "closest cell" tie-breaks.
    pub fn distance_squared(&self, other: &Coordinate) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx * dx + dy * dy + dz * dz
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Opaque material identifier for an occupied cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Material(pub u32);

impl std::fmt::Display for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "material#{}", self.0)
    }
}

/// What occupies a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Occupancy {
    /// Nothing there (air).
    #[default]
    Empty,
    /// A solid cell of the given material.
    Occupied(Material),
}

impl Occupancy {
    /// Returns true for any non-empty cell.
    pub fn is_occupied(&self) -> bool {
        matches!(self, Occupancy::Occupied(_))
    }

    /// Returns the material, if any.
    pub fn material(&self) -> Option<Material> {
        match self {
            Occupancy::Empty => None,
            Occupancy::Occupied(m) => Some(*m),
        }
    }

    /// True when this cell is occupied and, if `expected` is set, holds that material.
    pub fn matches(&self, expected: Option<Material>) -> bool {
        match (self, expected) {
            (Occupancy::Empty, _) => false,
            (Occupancy::Occupied(_), None) => true,
            (Occupancy::Occupied(m), Some(e)) => *m == e,
        }
    }
}

impl std::fmt::Display for Occupancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Occupancy::Empty => write!(f, "empty"),
            Occupancy::Occupied(m) => write!(f, "{}", m),
        }
    }
}

/// Identifier of a tracked object in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Unique identifier for a watcher.
///
/// Opaque; used for logging and diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatcherId(pub Uuid);

impl WatcherId {
    /// Creates a deterministic WatcherId from a seed (for simulation and tests).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 hex chars are enough to tell watchers apart in logs
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}
