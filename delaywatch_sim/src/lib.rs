//! delaywatch Deterministic Simulation Harness
//!
//! Runs the watcher scheduler against a small voxel world where everything is
//! controlled by the scenario:
//! - **World**: a sparse cell grid plus falling bodies under fixed-step gravity
//! - **Script**: cell edits and object removals applied at chosen ticks
//! - **Faults**: every cell query fails on injected ticks
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                     │
//! │  ┌──────────────┐   tick    ┌──────────────────────┐  │
//! │  │   SimWorld   │◄──────────│      Scheduler       │  │
//! │  │ cells+bodies │  samples  │  watchers (in order) │  │
//! │  └──────────────┘           └──────────┬───────────┘  │
//! │                                        │ resume       │
//! │                             ┌──────────▼───────────┐  │
//! │                             │  RecordingResolver   │  │
//! │                             └──────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use delaywatch_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::GuardRace);
//! assert!(result.passed);
//! ```

mod body;
mod error;
mod exporter;
mod resolver;
mod runner;
mod world;
pub mod scenarios;

pub use body::FallingBody;
pub use error::SimError;
pub use exporter::{BodyPosition, SimEvent, SimExport, SimFrame};
pub use resolver::RecordingResolver;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use world::{SimConfig, SimWorld, StepEvents, WorldEdit, LOG, SAND, STONE};
