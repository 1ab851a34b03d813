//! Impact planning: what to wait on when a deferred action hits something.
//!
//! An impact (a cell hit, optionally an object hit) is turned into zero, one or
//! two watchers:
//!
//! | Situation                                  | Watchers                          |
//! |--------------------------------------------|-----------------------------------|
//! | hit object is a live projectile            | object watcher                    |
//! | projectile found near the hit point        | object + region, sharing a guard  |
//! | hit cell holds a settling material         | region watcher                    |
//! | anything else                              | none; resolve immediately         |

use crate::error::WatchError;
use crate::guard::GuardToken;
use crate::scheduler::{Scheduler, WatchRequest};
use delaywatch_env::{
    Coordinate, Environment, Material, ObjectId, ResolutionCause, Resolver, ResumeContext,
    WatcherId,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Impact planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Growing search radii for nearby projectiles
    pub search_radii: Vec<f64>,

    /// Materials that may still move after being hit (sand, logs)
    pub settling: HashSet<Material>,

    /// Neighborhood radius of the region watcher on the hit cell
    pub region_radius: i32,

    /// Timeout for every watcher the planner creates
    pub timeout_ticks: u32,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            search_radii: vec![1.5, 3.0, 6.0, 12.0, 24.0],
            settling: HashSet::new(),
            region_radius: 1,
            timeout_ticks: 20 * 60,
        }
    }
}

impl ImpactConfig {
    pub fn with_settling(mut self, materials: impl IntoIterator<Item = Material>) -> Self {
        self.settling.extend(materials);
        self
    }
}

/// A deferred action landing somewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impact {
    /// Exact hit point
    pub point: Vector3<f64>,

    /// Cell that was hit
    pub cell: Coordinate,

    /// Object that was hit directly, if any
    pub object: Option<ObjectId>,
}

impl Impact {
    /// An impact on a cell, hit at its center.
    pub fn on_cell(cell: Coordinate) -> Self {
        Self {
            point: Vector3::new(
                f64::from(cell.x) + 0.5,
                f64::from(cell.y) + 0.5,
                f64::from(cell.z) + 0.5,
            ),
            cell,
            object: None,
        }
    }

    /// An impact on an object occupying `cell`.
    pub fn on_object(id: ObjectId, point: Vector3<f64>) -> Self {
        Self {
            point,
            cell: Coordinate::containing(point.x, point.y, point.z),
            object: Some(id),
        }
    }
}

/// What the planner decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpactOutcome {
    /// Watchers registered with the scheduler
    Watching(Vec<WatcherId>),

    /// Nothing to wait for; the resolver was called on the spot
    ResolvedImmediately { resumed: bool },
}

/// Decides which watchers an impact needs.
#[derive(Debug, Clone, Default)]
pub struct ImpactPlanner {
    config: ImpactConfig,
}

impl ImpactPlanner {
    pub fn new(config: ImpactConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Plans and registers the watchers for `impact`.
    pub fn plan(
        &self,
        scheduler: &mut Scheduler,
        env: &dyn Environment,
        impact: &Impact,
        resolver: Arc<dyn Resolver>,
    ) -> Result<ImpactOutcome, WatchError> {
        info!("impact at {} (object: {:?})", impact.cell, impact.object);

        if let Some(hit) = impact.object {
            if let Some(object) = env.object(hit) {
                if object.is_projectile() {
                    if !object.is_valid() {
                        info!("impact: hit {} already removed -> resolving immediately", hit);
                        return Ok(resolve_now(scheduler, impact.cell, resolver));
                    }
                    let request =
                        self.object_request(hit, object.current_coordinate(), object.payload());
                    let id = scheduler.add_watcher(env, request, resolver)?;
                    info!("impact: watching hit {} with watcher {}", hit, id);
                    return Ok(ImpactOutcome::Watching(vec![id]));
                }
            }
        }

        if let Some(found) = self.nearest_projectile(env, impact.point) {
            let Some(object) = env.object(found) else {
                return Ok(resolve_now(scheduler, impact.cell, resolver));
            };
            if !object.is_valid() {
                info!("impact: nearby {} already removed -> resolving immediately", found);
                return Ok(resolve_now(scheduler, impact.cell, resolver));
            }

            let guard = GuardToken::new();
            let object_request = self
                .object_request(found, object.current_coordinate(), object.payload())
                .with_guard(guard.clone());
            let region_request = self.region_request(impact.cell).with_guard(guard);

            let object_watcher = scheduler.add_watcher(env, object_request, resolver.clone())?;
            let region_watcher = scheduler.add_watcher(env, region_request, resolver)?;
            info!(
                "impact: watching nearby {} ({}) and hit cell {} ({}) under one guard",
                found, object_watcher, impact.cell, region_watcher
            );
            return Ok(ImpactOutcome::Watching(vec![object_watcher, region_watcher]));
        }

        let hit = match env.occupancy_at(impact.cell) {
            Ok(occupancy) => occupancy,
            Err(e) => {
                warn!("impact: cannot sample hit cell {}: {}", impact.cell, e);
                return Ok(resolve_now(scheduler, impact.cell, resolver));
            }
        };
        debug!("impact: hit cell {} holds {}", impact.cell, hit);

        match hit.material() {
            Some(material) if self.config.settling.contains(&material) => {
                let id = scheduler.add_watcher(env, self.region_request(impact.cell), resolver)?;
                info!("impact: {} may still move -> watching {} ({})", material, impact.cell, id);
                Ok(ImpactOutcome::Watching(vec![id]))
            }
            _ => {
                info!("impact: nothing to wait for at {} -> resolving immediately", impact.cell);
                Ok(resolve_now(scheduler, impact.cell, resolver))
            }
        }
    }

    /// Nearest projectile to `point`, searching the configured radii in order.
    ///
    /// Removed objects that are still reported nearby lose to any live one in
    /// range, even at a larger radius. The nearest removed one is returned only
    /// when no radius holds a live projectile.
    fn nearest_projectile(&self, env: &dyn Environment, point: Vector3<f64>) -> Option<ObjectId> {
        let mut removed = None;
        for &radius in &self.config.search_radii {
            let found = env
                .objects_near(point, radius)
                .into_iter()
                .filter_map(|id| env.object(id).map(|o| (id, o)))
                .filter(|(_, o)| o.is_projectile())
                .map(|(id, o)| (id, o.is_valid(), (o.position() - point).norm_squared()))
                .min_by(|a, b| b.1.cmp(&a.1).then(a.2.total_cmp(&b.2)).then(a.0.cmp(&b.0)));

            debug!("impact: search radius={} candidate={:?}", radius, found.map(|(id, ..)| id));
            match found {
                Some((id, true, _)) => return Some(id),
                Some((id, false, _)) => {
                    removed.get_or_insert(id);
                }
                None => {}
            }
        }
        removed
    }

    fn object_request(
        &self,
        id: ObjectId,
        at: Coordinate,
        payload: Option<Material>,
    ) -> WatchRequest {
        let request = WatchRequest::object(id, at).with_timeout(self.config.timeout_ticks);
        match payload {
            Some(material) => request.expecting(material),
            None => request,
        }
    }

    fn region_request(&self, cell: Coordinate) -> WatchRequest {
        WatchRequest::region(cell, self.config.region_radius)
            .with_timeout(self.config.timeout_ticks)
    }
}

/// Calls the resolver outside any watcher, with the same failure containment.
fn resolve_now(
    scheduler: &Scheduler,
    anchor: Coordinate,
    resolver: Arc<dyn Resolver>,
) -> ImpactOutcome {
    let context = ResumeContext {
        watcher: None,
        anchor,
        cause: ResolutionCause::Immediate,
        tick: scheduler.tick_count(),
    };
    let resumed = match resolver.resume(&context) {
        Ok(()) => true,
        Err(e) => {
            warn!("impact: immediate resume at {} failed: {}", anchor, e);
            false
        }
    };
    ImpactOutcome::ResolvedImmediately { resumed }
}
