//! Baseline snapshots: what each cell looked like when a watcher first saw it.
//!
//! The baseline is how a watcher tells "something new landed here" from "that
//! was always there". It is lazily populated: the first sighting of a cell is
//! recorded silently, and only later differences count as changes.

use crate::zone::{DetectionZone, Neighborhood};
use delaywatch_env::{CellSource, Coordinate, EnvError, Material, Occupancy};
use std::collections::HashMap;
use tracing::debug;

/// One sampled cell.
pub type Sample = (Coordinate, Occupancy);

/// Samples every cell of a neighborhood.
///
/// All-or-nothing: on the first failure the partial result is discarded, so a
/// failed tick never half-updates a baseline.
pub fn sample_neighborhood<S: CellSource + ?Sized>(
    source: &S,
    neighborhood: &Neighborhood,
) -> Result<Vec<Sample>, EnvError> {
    let mut samples = Vec::with_capacity(neighborhood.len());
    for at in neighborhood.cells() {
        samples.push((at, source.occupancy_at(at)?));
    }
    Ok(samples)
}

/// Result of folding a tick's samples into the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineDelta {
    /// Best qualifying changed cell, if any
    pub candidate: Option<Coordinate>,

    /// Cells seen for the first time
    pub first_seen: usize,

    /// Changes recorded without triggering
    pub absorbed: usize,
}

/// Watcher-private map from coordinate to last-observed occupancy.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    cells: HashMap<Coordinate, Occupancy>,
}

impl Baseline {
    /// Creates an empty baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a baseline from an initial snapshot.
    pub fn from_samples(samples: &[Sample]) -> Self {
        Self {
            cells: samples.iter().copied().collect(),
        }
    }

    /// Last observed occupancy at `at`.
    pub fn get(&self, at: &Coordinate) -> Option<Occupancy> {
        self.cells.get(at).copied()
    }

    /// Number of recorded cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Records every sample and reports the most relevant change.
    ///
    /// A change qualifies when the new value is occupied (and matches
    /// `expected`, if set) and the cell lies inside `zone` relative to
    /// `reference`. Among qualifying cells the one closest to `reference` wins,
    /// with coordinate order breaking exact ties. Non-qualifying changes are
    /// recorded too, so the same state never counts twice.
    pub fn absorb(
        &mut self,
        samples: &[Sample],
        zone: &DetectionZone,
        reference: Coordinate,
        expected: Option<Material>,
    ) -> BaselineDelta {
        let mut delta = BaselineDelta::default();

        for &(at, now) in samples {
            let previous = match self.cells.insert(at, now) {
                None => {
                    delta.first_seen += 1;
                    continue;
                }
                Some(previous) => previous,
            };
            if previous == now {
                continue;
            }

            if now.matches(expected) && zone.contains(at, reference) {
                let better = match delta.candidate {
                    None => true,
                    Some(best) => {
                        (at.distance_squared(&reference), at)
                            < (best.distance_squared(&reference), best)
                    }
                };
                if better {
                    delta.candidate = Some(at);
                }
            } else {
                debug!(
                    "baseline: change at {} {} -> {} ignored (reference {})",
                    at, previous, now, reference
                );
                delta.absorbed += 1;
            }
        }

        delta
    }
}
