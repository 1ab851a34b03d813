//! Falling bodies: the simulator's tracked objects.
//!
//! A body integrates gravity once per tick with a terminal velocity below one
//! cell per tick, so it can never tunnel through a cell. Hovering bodies
//! ignore gravity (held or levitating objects).

use delaywatch_env::{Coordinate, Material, ObjectId, TrackedObject};
use nalgebra::Vector3;

/// A simulated moving object.
#[derive(Debug, Clone)]
pub struct FallingBody {
    /// Object id
    pub id: ObjectId,

    /// Position in cells (y is up)
    pub position: Vector3<f64>,

    /// Velocity in cells per tick
    pub velocity: Vector3<f64>,

    /// Material placed where the body lands
    pub payload: Material,

    /// False once removed from the world
    pub active: bool,

    /// Whether gravity applies
    pub falls: bool,

    /// Whether impacts should wait on this body
    pub projectile: bool,
}

impl FallingBody {
    /// Creates a body that falls under gravity.
    pub fn falling(id: ObjectId, position: Vector3<f64>, payload: Material) -> Self {
        Self {
            id,
            position,
            velocity: Vector3::zeros(),
            payload,
            active: true,
            falls: true,
            projectile: true,
        }
    }

    /// Creates a body that stays where it is.
    pub fn hovering(id: ObjectId, position: Vector3<f64>, payload: Material) -> Self {
        Self {
            falls: false,
            ..Self::falling(id, position, payload)
        }
    }

    /// Sets whether impacts treat this body as worth waiting on.
    pub fn with_projectile(mut self, projectile: bool) -> Self {
        self.projectile = projectile;
        self
    }

    /// Applies one tick of gravity, capped at `terminal` cells per tick.
    pub fn accelerate(&mut self, gravity: f64, terminal: f64) {
        if self.falls {
            self.velocity.y = (self.velocity.y - gravity).max(-terminal);
        }
    }

    /// Position after this tick's velocity is applied.
    pub fn next_position(&self) -> Vector3<f64> {
        self.position + self.velocity
    }
}

impl TrackedObject for FallingBody {
    fn is_valid(&self) -> bool {
        self.active
    }

    fn current_coordinate(&self) -> Coordinate {
        Coordinate::containing(self.position.x, self.position.y, self.position.z)
    }

    fn position(&self) -> Vector3<f64> {
        self.position
    }

    fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    fn payload(&self) -> Option<Material> {
        Some(self.payload)
    }

    fn is_projectile(&self) -> bool {
        self.projectile
    }
}
