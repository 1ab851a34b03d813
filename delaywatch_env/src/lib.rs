//! delaywatch Environment Abstraction Layer
//!
//! This crate defines the narrow interfaces between the watcher core and the
//! world it observes:
//! - **Cells**: `CellSource::occupancy_at()` - what occupies a coordinate
//! - **Objects**: `ObjectSource` / `TrackedObject` - moving bodies to follow
//! - **Resolution**: `Resolver::resume()` - the one-shot action to fire
//!
//! The game host implements these against its live level; the simulation
//! harness implements them against a deterministic voxel grid.
//!
//! # Example
//!
//! ```ignore
//! use delaywatch_env::{CellSource, Coordinate, EnvError, Material, Occupancy};
//!
//! struct Flat;
//!
//! impl CellSource for Flat {
//!     fn occupancy_at(&self, at: Coordinate) -> Result<Occupancy, EnvError> {
//!         Ok(if at.y < 0 { Occupancy::Occupied(Material(1)) } else { Occupancy::Empty })
//!     }
//! }
//! ```

mod error;
mod resolver;
mod types;
mod world;

pub use error::EnvError;
pub use resolver::{ResolutionCause, Resolver, ResumeContext};
pub use types::{Coordinate, Material, ObjectId, Occupancy, WatcherId};
pub use world::{CellSource, Environment, ObjectSource, TrackedObject};
