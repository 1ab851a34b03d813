//! JSON timeline exporter.
//!
//! Records a frame whenever something happens (a landing, a trigger, a resume)
//! so a run can be inspected after the fact.

use crate::error::SimError;
use crate::world::{SimWorld, StepEvents};

use delaywatch_core::TickReport;
use delaywatch_env::{ResumeContext, TrackedObject};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Scheduler tick
    pub tick: u64,

    /// Simulation time in seconds
    pub time_sec: f64,

    /// Watchers held by the scheduler after the tick
    pub watchers: usize,

    /// Bodies still in the world
    pub bodies: Vec<BodyPosition>,

    /// Per-tick scheduler counts
    pub report: TickReport,

    /// Landings, removals, faults
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of a body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    fn info(message: String) -> Self {
        Self { message, level: None }
    }

    fn warn(message: String) -> Self {
        Self {
            message,
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Frames with activity
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Every accepted resume
    pub resumes: Vec<ResumeContext>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            resumes: Vec::new(),
        }
    }

    /// Records the tick if anything happened in it.
    pub fn record(
        &mut self,
        world: &SimWorld,
        report: &TickReport,
        events: &StepEvents,
        watchers: usize,
        tick_rate_hz: u32,
    ) {
        let time_sec = report.tick as f64 / f64::from(tick_rate_hz.max(1));
        self.duration_sec = time_sec;

        let mut messages = Vec::new();
        for (id, at) in &events.landed {
            messages.push(SimEvent::info(format!("{} landed at {}", id, at)));
        }
        for id in &events.removed {
            messages.push(SimEvent::info(format!("{} removed", id)));
        }
        if world.is_faulty(report.tick) {
            messages.push(SimEvent::warn(format!("sampling fault at tick {}", report.tick)));
        }

        let active = report.triggered
            + report.resolver_calls()
            + report.claims_lost
            + report.superseded
            + report.sample_failures;
        if active == 0 && messages.is_empty() {
            return;
        }

        let bodies = world
            .active_bodies()
            .map(|b| {
                let p = b.position();
                BodyPosition {
                    id: b.id.0,
                    x: p.x,
                    y: p.y,
                    z: p.z,
                }
            })
            .collect();

        self.frames.push(SimFrame {
            tick: report.tick,
            time_sec,
            watchers,
            bodies,
            report: report.clone(),
            events: messages,
        });
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, resumes: Vec<ResumeContext>) {
        self.passed = passed;
        self.resumes = resumes;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
