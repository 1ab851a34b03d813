//! In-memory world and resolver used by the unit tests.

use delaywatch_env::{
    CellSource, Coordinate, EnvError, Material, ObjectId, ObjectSource, Occupancy, Resolver,
    ResumeContext, TrackedObject,
};
use nalgebra::Vector3;
use std::collections::HashMap;
use std::sync::Mutex;

pub const STONE: Material = Material(1);
pub const SAND: Material = Material(2);

#[derive(Debug, Clone)]
pub struct TestObject {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub projectile: bool,
    pub valid: bool,
}

impl TrackedObject for TestObject {
    fn is_valid(&self) -> bool {
        self.valid
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

    fn is_projectile(&self) -> bool {
        self.projectile
    }
}

#[derive(Debug, Default)]
pub struct TestWorld {
    cells: HashMap<Coordinate, Material>,
    objects: HashMap<ObjectId, TestObject>,
    next_object: u64,
    failing: bool,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&mut self, at: Coordinate, material: Material) {
        self.cells.insert(at, material);
    }

    pub fn clear(&mut self, at: Coordinate) {
        self.cells.remove(&at);
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn spawn(&mut self, position: Vector3<f64>, velocity: Vector3<f64>) -> ObjectId {
        self.insert_object(TestObject {
            position,
            velocity,
            projectile: true,
            valid: true,
        })
    }

    pub fn insert_object(&mut self, object: TestObject) -> ObjectId {
        self.next_object += 1;
        let id = ObjectId(self.next_object);
        self.objects.insert(id, object);
        id
    }

    pub fn move_object(&mut self, id: ObjectId, position: Vector3<f64>) {
        if let Some(o) = self.objects.get_mut(&id) {
            o.position = position;
        }
    }

    pub fn set_velocity(&mut self, id: ObjectId, velocity: Vector3<f64>) {
        if let Some(o) = self.objects.get_mut(&id) {
            o.velocity = velocity;
        }
    }

    /// Marks the object removed but keeps it queryable.
    pub fn invalidate(&mut self, id: ObjectId) {
        if let Some(o) = self.objects.get_mut(&id) {
            o.valid = false;
        }
    }

    pub fn remove_object(&mut self, id: ObjectId) {
        self.objects.remove(&id);
    }
}

impl CellSource for TestWorld {
    fn occupancy_at(&self, at: Coordinate) -> Result<Occupancy, EnvError> {
        if self.failing {
            return Err(EnvError::sampling(at, "test fault"));
        }
        Ok(self
            .cells
            .get(&at)
            .map(|m| Occupancy::Occupied(*m))
            .unwrap_or_default())
    }
}

impl ObjectSource for TestWorld {
    fn object(&self, id: ObjectId) -> Option<&dyn TrackedObject> {
        self.objects.get(&id).map(|o| o as &dyn TrackedObject)
    }

    fn objects_near(&self, center: Vector3<f64>, radius: f64) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, o)| (o.position - center).norm() <= radius)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

/// Records every resume call.
#[derive(Debug, Default)]
pub struct CountingResolver {
    calls: Mutex<Vec<ResumeContext>>,
    fail: bool,
}

impl CountingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<ResumeContext> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl Resolver for CountingResolver {
    fn resume(&self, context: &ResumeContext) -> Result<(), EnvError> {
        self.calls.lock().unwrap().push(context.clone());
        if self.fail {
            Err(EnvError::resolver("test resolver failure"))
        } else {
            Ok(())
        }
    }
}
