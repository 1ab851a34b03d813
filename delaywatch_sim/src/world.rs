//! SimWorld - a deterministic voxel world for the scheduler to watch.

use crate::body::FallingBody;
use crate::error::SimError;

use delaywatch_core::{ImpactConfig, WatchConfig};
use delaywatch_env::{
    CellSource, Coordinate, EnvError, Material, ObjectId, ObjectSource, Occupancy, TrackedObject,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Solid ground.
pub const STONE: Material = Material(1);

/// Loose material that may still fall after being hit.
pub const SAND: Material = Material(2);

/// Wood; settles like sand in the default impact config.
pub const LOG: Material = Material(3);

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Tick rate in Hz (for reporting only)
    pub tick_rate_hz: u32,

    /// Downward acceleration in cells per tick squared
    pub gravity: f64,

    /// Maximum fall speed in cells per tick; below 1 so bodies never skip a cell
    pub terminal_velocity: f64,

    /// Bodies falling below this height are removed without landing
    pub floor_y: i32,

    /// Maximum ticks per scenario
    pub max_ticks: u64,

    /// Scheduler defaults
    pub watch: WatchConfig,

    /// Impact planner tuning
    pub impact: ImpactConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 20,
            gravity: 0.04,
            terminal_velocity: 0.9,
            floor_y: -64,
            max_ticks: 2400,
            watch: WatchConfig::default(),
            impact: ImpactConfig::default().with_settling([SAND, LOG]),
        }
    }
}

impl SimConfig {
    /// Loads a config from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.watch.validate()?;
        Ok(config)
    }
}

/// A world change applied at the start of a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEdit {
    Place(Coordinate, Material),
    Clear(Coordinate),
    RemoveObject(ObjectId),
}

/// What happened during one world step.
#[derive(Debug, Clone, Default)]
pub struct StepEvents {
    /// Bodies that landed, and the cell their payload now occupies
    pub landed: Vec<(ObjectId, Coordinate)>,

    /// Bodies removed by script or by falling out of the world
    pub removed: Vec<ObjectId>,

    /// Scripted edits applied
    pub edits: usize,
}

/// The SimWorld - grid, bodies, scripted edits and injected faults.
pub struct SimWorld {
    gravity: f64,
    terminal_velocity: f64,
    floor_y: i32,
    cells: HashMap<Coordinate, Material>,
    bodies: BTreeMap<ObjectId, FallingBody>,
    next_object: u64,
    tick: u64,
    script: BTreeMap<u64, Vec<WorldEdit>>,
    fault_ticks: HashSet<u64>,
}

impl SimWorld {
    /// Creates an empty world.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            gravity: config.gravity,
            terminal_velocity: config.terminal_velocity,
            floor_y: config.floor_y,
            cells: HashMap::new(),
            bodies: BTreeMap::new(),
            next_object: 0,
            tick: 0,
            script: BTreeMap::new(),
            fault_ticks: HashSet::new(),
        }
    }

    /// Current tick; 0 before the first step.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn place(&mut self, at: Coordinate, material: Material) {
        self.cells.insert(at, material);
    }

    pub fn clear(&mut self, at: Coordinate) {
        self.cells.remove(&at);
    }

    pub fn material_at(&self, at: Coordinate) -> Option<Material> {
        self.cells.get(&at).copied()
    }

    /// Fills a square floor of side `2 * radius + 1` at height `y`.
    pub fn fill_floor(&mut self, y: i32, radius: i32, material: Material) {
        for x in -radius..=radius {
            for z in -radius..=radius {
                self.cells.insert(Coordinate::new(x, y, z), material);
            }
        }
    }

    fn next_id(&mut self) -> ObjectId {
        self.next_object += 1;
        ObjectId(self.next_object)
    }

    /// Drops a body that falls under gravity.
    pub fn spawn_falling(&mut self, position: Vector3<f64>, payload: Material) -> ObjectId {
        let id = self.next_id();
        self.bodies.insert(id, FallingBody::falling(id, position, payload));
        id
    }

    /// Places a body that stays put until removed.
    pub fn spawn_hovering(&mut self, position: Vector3<f64>, payload: Material) -> ObjectId {
        let id = self.next_id();
        self.bodies.insert(id, FallingBody::hovering(id, position, payload));
        id
    }

    /// Places a hovering body that impacts never wait on (a dropped item, a mob).
    pub fn spawn_prop(&mut self, position: Vector3<f64>, payload: Material) -> ObjectId {
        let id = self.next_id();
        let body = FallingBody::hovering(id, position, payload).with_projectile(false);
        self.bodies.insert(id, body);
        id
    }

    /// Marks a body removed. It stays queryable as invalid until the next step.
    pub fn remove_object(&mut self, id: ObjectId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.active = false;
        }
    }

    pub fn body(&self, id: ObjectId) -> Option<&FallingBody> {
        self.bodies.get(&id)
    }

    /// Bodies still in the world.
    pub fn active_bodies(&self) -> impl Iterator<Item = &FallingBody> {
        self.bodies.values().filter(|b| b.active)
    }

    /// Schedules an edit for the start of `tick`.
    pub fn schedule(&mut self, tick: u64, edit: WorldEdit) {
        self.script.entry(tick).or_default().push(edit);
    }

    /// Makes every cell query fail during `tick`.
    pub fn inject_fault(&mut self, tick: u64) {
        self.fault_ticks.insert(tick);
    }

    pub fn is_faulty(&self, tick: u64) -> bool {
        self.fault_ticks.contains(&tick)
    }

    /// Advances one tick: purge removed bodies, apply edits, integrate bodies.
    pub fn step(&mut self) -> StepEvents {
        self.tick += 1;
        let mut events = StepEvents::default();

        self.bodies.retain(|_, b| b.active);

        if let Some(edits) = self.script.remove(&self.tick) {
            for edit in edits {
                match edit {
                    WorldEdit::Place(at, material) => {
                        self.cells.insert(at, material);
                    }
                    WorldEdit::Clear(at) => {
                        self.cells.remove(&at);
                    }
                    WorldEdit::RemoveObject(id) => {
                        if let Some(body) = self.bodies.get_mut(&id) {
                            body.active = false;
                            events.removed.push(id);
                        }
                    }
                }
                events.edits += 1;
            }
        }

        for body in self.bodies.values_mut() {
            if !body.active || !body.falls {
                continue;
            }
            body.accelerate(self.gravity, self.terminal_velocity);
            let next = body.next_position();
            let cell = Coordinate::containing(next.x, next.y, next.z);

            if self.cells.contains_key(&cell) {
                let rest = cell.above(1);
                body.position = Vector3::new(next.x, f64::from(rest.y), next.z);
                body.velocity = Vector3::zeros();
                body.active = false;
                self.cells.insert(rest, body.payload);
                debug!("tick {}: {} landed at {}", self.tick, body.id, rest);
                events.landed.push((body.id, rest));
            } else if cell.y < self.floor_y {
                body.active = false;
                debug!("tick {}: {} fell out of the world", self.tick, body.id);
                events.removed.push(body.id);
            } else {
                body.position = next;
            }
        }

        events
    }
}

impl CellSource for SimWorld {
    fn occupancy_at(&self, at: Coordinate) -> Result<Occupancy, EnvError> {
        if self.fault_ticks.contains(&self.tick) {
            return Err(EnvError::sampling(at, format!("injected fault at tick {}", self.tick)));
        }
        Ok(self
            .cells
            .get(&at)
            .map(|m| Occupancy::Occupied(*m))
            .unwrap_or_default())
    }
}

impl ObjectSource for SimWorld {
    fn object(&self, id: ObjectId) -> Option<&dyn TrackedObject> {
        self.bodies.get(&id).map(|b| b as &dyn TrackedObject)
    }

    fn objects_near(&self, center: Vector3<f64>, radius: f64) -> Vec<ObjectId> {
        self.bodies
            .values()
            .filter(|b| (b.position - center).norm() <= radius)
            .map(|b| b.id)
            .collect()
    }
}
