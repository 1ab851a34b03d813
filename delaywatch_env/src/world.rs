//! World query traits consumed by the watcher core.

use crate::error::EnvError;
use crate::types::{Coordinate, Material, ObjectId, Occupancy};
use nalgebra::Vector3;

/// Answers "what is at coordinate P".
///
/// Must be side-effect free: the core calls it every tick, for every watcher,
/// for every cell of the watcher's (bounded) neighborhood.
///
/// # Implementations
///
/// - **Game host**: wraps the level's block state lookup
/// - **Simulation**: `SimWorld` in `delaywatch_sim`, with injectable faults
pub trait CellSource {
    /// Returns the occupancy at `at`.
    ///
    /// # Returns
    /// * `Ok(occupancy)` - The cell was sampled
    /// * `Err(EnvError::Sampling)` - Transient failure; the caller retries next tick
    fn occupancy_at(&self, at: Coordinate) -> Result<Occupancy, EnvError>;
}

/// A moving object an object-centered watcher follows.
pub trait TrackedObject {
    /// False once the object has been removed from the world.
    fn is_valid(&self) -> bool;

    /// Cell currently containing the object.
    fn current_coordinate(&self) -> Coordinate;

    /// Exact position, for distance comparisons.
    fn position(&self) -> Vector3<f64>;

    /// Velocity in cells per tick; `y` is vertical.
    fn velocity(&self) -> Vector3<f64>;

    /// Material the object turns into when it settles, if known.
    fn payload(&self) -> Option<Material> {
        None
    }

    /// Whether the object is something worth waiting on (a falling or thrown body).
    fn is_projectile(&self) -> bool {
        true
    }
}

/// Looks up tracked objects by id.
pub trait ObjectSource {
    /// Returns the object, or `None` if it no longer exists at all.
    fn object(&self, id: ObjectId) -> Option<&dyn TrackedObject>;

    /// Ids of objects whose position lies within `radius` of `center`.
    fn objects_near(&self, center: Vector3<f64>, radius: f64) -> Vec<ObjectId> {
        let _ = (center, radius);
        Vec::new()
    }
}

/// Everything a watcher needs from the world.
pub trait Environment: CellSource + ObjectSource {}

impl<T: CellSource + ObjectSource + ?Sized> Environment for T {}
