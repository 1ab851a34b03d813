//! The watcher state machine.
//!
//! One watcher covers one deferred condition. Every tick it either scans the
//! world, counts down a stage delay, or makes its single resolution attempt:
//!
//! ```text
//!   Scanning ──trigger──► Scheduled ──stage one──► ResumePending ──stage two──► Resolved
//!      │                                                                          ▲
//!      ├──guard already claimed──► Expired                                        │
//!      └──timeout (any live state)────────────────────────────────────────────────┘
//! ```
//!
//! Triggers while scanning:
//! 1. a cell inside the detection zone changes to a new occupied value
//! 2. the tracked object stops falling on top of an occupied cell
//! 3. the tracked object vanished and the grace period ran out
//!
//! Failures while sampling are contained: the tick changes nothing and the
//! watcher tries again next tick. A failing `resume()` is logged and the
//! watcher still ends `Resolved`; the action is one-shot.

use crate::baseline::{sample_neighborhood, Baseline, Sample};
use crate::config::{FallbackScan, WatchConfig};
use crate::guard::GuardToken;
use crate::zone::{DetectionZone, Neighborhood};
use delaywatch_env::{
    CellSource, Coordinate, EnvError, Environment, Material, ObjectId, Occupancy,
    ResolutionCause, Resolver, ResumeContext, WatcherId,
};
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a watcher is pointed at when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// A fixed cell
    Region { anchor: Coordinate },

    /// A moving object; `origin` is used if the object is already gone
    Object { id: ObjectId, origin: Coordinate },
}

/// How a live watcher finds its reference point each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Centered on a fixed cell
    Region { anchor: Coordinate },

    /// Re-centered on the tracked object every tick
    Object { id: ObjectId },
}

impl std::fmt::Display for WatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchMode::Region { anchor } => write!(f, "region@{}", anchor),
            WatchMode::Object { id } => write!(f, "{}", id),
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Looking for a trigger
    Scanning,

    /// Triggered; waiting out the first delay
    Scheduled { remaining: u32 },

    /// Waiting out the second delay before the resolution attempt
    ResumePending { remaining: u32 },

    /// Resolution attempted (won or lost)
    Resolved,

    /// Cancelled or superseded by a sibling; never resolved
    Expired,
}

impl WatcherState {
    /// True for `Resolved` and `Expired`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherState::Resolved | WatcherState::Expired)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            WatcherState::Scanning => "scanning",
            WatcherState::Scheduled { .. } => "scheduled",
            WatcherState::ResumePending { .. } => "resume_pending",
            WatcherState::Resolved => "resolved",
            WatcherState::Expired => "expired",
        }
    }
}

/// What a single `tick()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Watcher was already terminal; nothing happened
    Inert,

    /// Scanned, nothing relevant
    Scanning,

    /// Sampling failed; state unchanged, retried next tick
    SampleFailed,

    /// Trigger fired; resolution scheduled
    Triggered {
        cause: ResolutionCause,
        anchor: Coordinate,
    },

    /// Counting down a stage delay
    Waiting,

    /// A sibling already claimed the guard; expired without resolving
    Superseded,

    /// Won the claim and the resolver ran
    Resumed {
        cause: ResolutionCause,
        anchor: Coordinate,
    },

    /// Won the claim but the resolver failed (not retried)
    ResumeFailed {
        cause: ResolutionCause,
        anchor: Coordinate,
    },

    /// Reached resolution after a sibling had already claimed the guard
    ClaimLost,
}

impl TickOutcome {
    /// True if this tick ended the watcher's life.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TickOutcome::Superseded
                | TickOutcome::Resumed { .. }
                | TickOutcome::ResumeFailed { .. }
                | TickOutcome::ClaimLost
        )
    }

    /// True if the resolver was invoked this tick.
    pub fn invoked_resolver(&self) -> bool {
        matches!(self, TickOutcome::Resumed { .. } | TickOutcome::ResumeFailed { .. })
    }
}

/// Effective per-watcher parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    pub zone: DetectionZone,
    pub radius: i32,
    pub timeout_ticks: u32,
    pub stage_one_delay: u32,
    pub stage_two_delay: u32,
    pub grace_ticks: u32,
    pub settle_velocity: f64,
    pub expected: Option<Material>,
    pub fallback: FallbackScan,
    pub log_every: u32,
}

impl WatchSettings {
    /// Settings taken straight from a scheduler config.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            zone: config.zone,
            radius: config.neighborhood_radius,
            timeout_ticks: config.timeout_ticks,
            stage_one_delay: config.stage_one_delay,
            stage_two_delay: config.stage_two_delay,
            grace_ticks: config.grace_ticks,
            settle_velocity: config.settle_velocity,
            expected: None,
            fallback: config.fallback,
            log_every: config.log_every,
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

/// What the tracked object looked like this tick.
#[derive(Debug, Clone, Copy)]
enum Sighting {
    Live { at: Coordinate, velocity: Vector3<f64> },
    Gone,
    Fixed,
}

#[derive(Debug, Clone, Copy)]
struct Trigger {
    cause: ResolutionCause,
    anchor: Coordinate,
}

/// A single deferred-condition task.
pub struct Watcher {
    id: WatcherId,
    mode: WatchMode,
    settings: WatchSettings,
    baseline: Baseline,
    last_known: Coordinate,
    state: WatcherState,
    timeout_remaining: u32,
    deferred_target: Option<Coordinate>,
    cause: Option<ResolutionCause>,
    /// Ticks since the tracked object was found gone
    orphaned_for: Option<u32>,
    guard: Option<GuardToken>,
    resolver: Arc<dyn Resolver>,
    ticks_observed: u64,
    failed_ticks: u32,
}

impl Watcher {
    /// Creates a watcher and takes its initial baseline snapshot.
    ///
    /// A failed snapshot is not fatal: the baseline starts empty and is filled
    /// lazily on the first successful scan.
    pub fn new(
        id: WatcherId,
        target: WatchTarget,
        settings: WatchSettings,
        guard: Option<GuardToken>,
        resolver: Arc<dyn Resolver>,
        env: &dyn Environment,
    ) -> Self {
        let (mode, origin) = match target {
            WatchTarget::Region { anchor } => (WatchMode::Region { anchor }, anchor),
            WatchTarget::Object { id: object, origin } => {
                let at = env
                    .object(object)
                    .filter(|o| o.is_valid())
                    .map(|o| o.current_coordinate())
                    .unwrap_or(origin);
                (WatchMode::Object { id: object }, at)
            }
        };

        let neighborhood = Neighborhood::covering(origin, settings.radius, &settings.zone);
        let baseline = match sample_neighborhood(env, &neighborhood) {
            Ok(samples) => Baseline::from_samples(&samples),
            Err(e) => {
                warn!("watcher {}: failed to create baseline at {}: {}", id, origin, e);
                Baseline::new()
            }
        };

        info!(
            "watcher {} created for {} at {} timeout={} baseline={} guard={}",
            id,
            mode,
            origin,
            settings.timeout_ticks,
            baseline.len(),
            guard.is_some()
        );

        Self {
            id,
            mode,
            timeout_remaining: settings.timeout_ticks,
            settings,
            baseline,
            last_known: origin,
            state: WatcherState::Scanning,
            deferred_target: None,
            cause: None,
            orphaned_for: None,
            guard,
            resolver,
            ticks_observed: 0,
            failed_ticks: 0,
        }
    }

    /// Watcher id.
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Current watch mode (object watchers degrade to region mode).
    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// True once `Resolved` or `Expired`.
    pub fn is_expired(&self) -> bool {
        self.state.is_terminal()
    }

    /// Anchor chosen when the watcher left `Scanning`.
    pub fn deferred_target(&self) -> Option<Coordinate> {
        self.deferred_target
    }

    /// What triggered resolution, once known.
    pub fn cause(&self) -> Option<ResolutionCause> {
        self.cause
    }

    /// Last reference coordinate the watcher worked from.
    pub fn last_known(&self) -> Coordinate {
        self.last_known
    }

    /// Ticks left before the hard timeout.
    pub fn timeout_remaining(&self) -> u32 {
        self.timeout_remaining
    }

    /// The watcher's private baseline.
    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Shared guard, if any.
    pub fn guard(&self) -> Option<&GuardToken> {
        self.guard.as_ref()
    }

    /// Effective settings.
    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Number of ticks whose sampling failed.
    pub fn failed_ticks(&self) -> u32 {
        self.failed_ticks
    }

    /// Cancels the watcher without resolving.
    ///
    /// Returns false if it was already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        info!("watcher {}: cancelled in state {}", self.id, self.state.name());
        self.state = WatcherState::Expired;
        true
    }

    /// Runs one state-machine step. `now` is the scheduler tick.
    pub fn tick(&mut self, env: &dyn Environment, now: u64) -> TickOutcome {
        if self.state.is_terminal() {
            return TickOutcome::Inert;
        }

        self.ticks_observed += 1;
        self.timeout_remaining = self.timeout_remaining.saturating_sub(1);

        let outcome = match self.state {
            WatcherState::Scanning => self.tick_scanning(env, now),
            WatcherState::Scheduled { remaining } => {
                self.state = WatcherState::Scheduled {
                    remaining: remaining.saturating_sub(1),
                };
                self.advance_stages(now).unwrap_or(TickOutcome::Waiting)
            }
            WatcherState::ResumePending { remaining } => {
                self.state = WatcherState::ResumePending {
                    remaining: remaining.saturating_sub(1),
                };
                self.advance_stages(now).unwrap_or(TickOutcome::Waiting)
            }
            WatcherState::Resolved | WatcherState::Expired => TickOutcome::Inert,
        };

        if !self.state.is_terminal() && self.timeout_remaining == 0 {
            info!(
                "watcher {}: timeout in state {} -> resolving at best-known {}",
                self.id,
                self.state.name(),
                self.deferred_target.unwrap_or(self.last_known)
            );
            return self.attempt_resolution(now, ResolutionCause::Timeout);
        }

        outcome
    }

    fn tick_scanning(&mut self, env: &dyn Environment, now: u64) -> TickOutcome {
        if let Some(guard) = &self.guard {
            if guard.is_claimed() {
                debug!("watcher {}: guard already claimed -> expiring", self.id);
                self.state = WatcherState::Expired;
                return TickOutcome::Superseded;
            }
        }

        match self.scan(env) {
            Ok(Some(trigger)) => {
                self.schedule(trigger);
                self.advance_stages(now).unwrap_or(TickOutcome::Triggered {
                    cause: trigger.cause,
                    anchor: trigger.anchor,
                })
            }
            Ok(None) => {
                if self.settings.log_every > 0
                    && self.ticks_observed % u64::from(self.settings.log_every) == 0
                {
                    debug!(
                        "watcher {}: {} at {} no new cell (timeout in {})",
                        self.id, self.mode, self.last_known, self.timeout_remaining
                    );
                }
                TickOutcome::Scanning
            }
            Err(e) => {
                self.failed_ticks += 1;
                warn!("watcher {}: tick sampling failed, retrying next tick: {}", self.id, e);
                TickOutcome::SampleFailed
            }
        }
    }

    /// Samples the world and looks for a trigger.
    ///
    /// Everything is read before anything is committed, so an error leaves the
    /// watcher exactly as it was.
    fn scan(&mut self, env: &dyn Environment) -> Result<Option<Trigger>, EnvError> {
        let sighting = match self.mode {
            WatchMode::Object { id } => match env.object(id) {
                Some(o) if o.is_valid() => Sighting::Live {
                    at: o.current_coordinate(),
                    velocity: o.velocity(),
                },
                _ => Sighting::Gone,
            },
            WatchMode::Region { .. } => Sighting::Fixed,
        };

        let center = match (sighting, self.mode) {
            (Sighting::Live { at, .. }, _) => at,
            (_, WatchMode::Region { anchor }) => anchor,
            (_, WatchMode::Object { .. }) => self.last_known,
        };

        let neighborhood = Neighborhood::covering(center, self.settings.radius, &self.settings.zone);
        let samples = sample_neighborhood(env, &neighborhood)?;

        let settled_on = match sighting {
            Sighting::Live { at, velocity } if velocity.y.abs() < self.settings.settle_velocity => {
                let below = at.below(1);
                let occupancy = match lookup(&samples, below) {
                    Some(o) => o,
                    None => env.occupancy_at(below)?,
                };
                occupancy.is_occupied().then_some(below)
            }
            _ => None,
        };

        // Commit
        match sighting {
            Sighting::Live { at, .. } => self.last_known = at,
            Sighting::Gone => self.orphan(),
            Sighting::Fixed => {
                if let Some(elapsed) = self.orphaned_for.as_mut() {
                    *elapsed += 1;
                }
            }
        }

        let delta = self
            .baseline
            .absorb(&samples, &self.settings.zone, center, self.settings.expected);

        if let Some(at) = delta.candidate {
            info!("watcher {}: new cell at {} near {}", self.id, at, center);
            return Ok(Some(Trigger {
                cause: ResolutionCause::CellChanged,
                anchor: at,
            }));
        }

        if let Some(below) = settled_on {
            info!(
                "watcher {}: object settled at {} on occupied {}",
                self.id, self.last_known, below
            );
            return Ok(Some(Trigger {
                cause: ResolutionCause::ObjectSettled,
                anchor: below,
            }));
        }

        if let Some(elapsed) = self.orphaned_for {
            if elapsed >= self.settings.grace_ticks {
                let anchor = self.fallback_anchor(env);
                info!(
                    "watcher {}: grace expired after {} ticks without a new cell -> anchor {}",
                    self.id, elapsed, anchor
                );
                return Ok(Some(Trigger {
                    cause: ResolutionCause::ObjectVanished,
                    anchor,
                }));
            }
            debug!(
                "watcher {}: in grace ({}/{}) at {}",
                self.id, elapsed, self.settings.grace_ticks, self.last_known
            );
        }

        Ok(None)
    }

    /// Tracked object is gone: degrade to a region watcher at the last known cell.
    fn orphan(&mut self) {
        if let WatchMode::Object { id } = self.mode {
            info!(
                "watcher {}: {} removed -> region watch at {} with {} grace ticks",
                self.id, id, self.last_known, self.settings.grace_ticks
            );
        }
        self.mode = WatchMode::Region {
            anchor: self.last_known,
        };
        self.orphaned_for = Some(0);
    }

    /// Anchor when no changed cell is available.
    ///
    /// The highest hit among the columns around the last known cell wins (the
    /// expected material breaks ties, then the nearer column). With no column
    /// hit, a deeper straight-down ground scan; with nothing there either, the
    /// last known cell itself.
    fn fallback_anchor(&self, env: &dyn Environment) -> Coordinate {
        let origin = self.last_known;
        let scan = self.settings.fallback;
        let r = scan.column_radius;

        let mut best: Option<(Coordinate, Occupancy)> = None;
        for dx in -r..=r {
            for dz in -r..=r {
                let top = origin.offset(dx, 0, dz);
                let hit = match first_occupied_below(env, top, scan.depth) {
                    Ok(hit) => hit,
                    Err(e) => {
                        warn!("watcher {}: column scan failed at {}: {}", self.id, top, e);
                        continue;
                    }
                };
                if let Some(hit) = hit {
                    let better = best.map_or(true, |b| {
                        self.column_rank(hit, origin) < self.column_rank(b, origin)
                    });
                    if better {
                        best = Some(hit);
                    }
                }
            }
        }
        if let Some((at, _)) = best {
            return at;
        }

        match first_occupied_below(env, origin, scan.ground_depth) {
            Ok(Some((at, _))) => at,
            Ok(None) => origin,
            Err(e) => {
                warn!("watcher {}: ground scan failed, using {}: {}", self.id, origin, e);
                origin
            }
        }
    }

    /// Lower is better: higher cells, then expected material, then nearer columns.
    fn column_rank(
        &self,
        hit: (Coordinate, Occupancy),
        origin: Coordinate,
    ) -> (i32, bool, i64, Coordinate) {
        let (at, occupancy) = hit;
        let wrong_material = match self.settings.expected {
            Some(expected) => occupancy.material() != Some(expected),
            None => false,
        };
        (-at.y, wrong_material, at.distance_squared(&origin), at)
    }

    fn schedule(&mut self, trigger: Trigger) {
        self.deferred_target = Some(trigger.anchor);
        self.cause = Some(trigger.cause);
        self.state = WatcherState::Scheduled {
            remaining: self.settings.stage_one_delay,
        };
        info!(
            "watcher {}: {} -> resolve scheduled in {}+{} ticks at {}",
            self.id,
            trigger.cause,
            self.settings.stage_one_delay,
            self.settings.stage_two_delay,
            trigger.anchor
        );
    }

    /// Moves through any stage whose countdown has reached zero.
    fn advance_stages(&mut self, now: u64) -> Option<TickOutcome> {
        loop {
            match self.state {
                WatcherState::Scheduled { remaining: 0 } => {
                    debug!("watcher {}: stage one elapsed -> resume pending", self.id);
                    self.state = WatcherState::ResumePending {
                        remaining: self.settings.stage_two_delay,
                    };
                }
                WatcherState::ResumePending { remaining: 0 } => {
                    let cause = self.cause.unwrap_or(ResolutionCause::Timeout);
                    return Some(self.attempt_resolution(now, cause));
                }
                _ => return None,
            }
        }
    }

    /// The single resolution attempt. Always leaves the watcher `Resolved`.
    fn attempt_resolution(&mut self, now: u64, cause: ResolutionCause) -> TickOutcome {
        let anchor = self.deferred_target.unwrap_or(self.last_known);
        let won = self.guard.as_ref().map_or(true, |g| g.try_claim());

        self.cause = Some(cause);
        self.state = WatcherState::Resolved;

        if !won {
            info!("watcher {}: guard already claimed -> skipping resume", self.id);
            return TickOutcome::ClaimLost;
        }

        let context = ResumeContext {
            watcher: Some(self.id),
            anchor,
            cause,
            tick: now,
        };

        info!("watcher {}: calling resume ({}) at {}", self.id, cause, anchor);
        match self.resolver.resume(&context) {
            Ok(()) => TickOutcome::Resumed { cause, anchor },
            Err(e) => {
                error!("watcher {}: resume failed, not retrying: {}", self.id, e);
                TickOutcome::ResumeFailed { cause, anchor }
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("last_known", &self.last_known)
            .field("deferred_target", &self.deferred_target)
            .field("timeout_remaining", &self.timeout_remaining)
            .field("baseline_len", &self.baseline.len())
            .finish()
    }
}

fn lookup(samples: &[Sample], at: Coordinate) -> Option<Occupancy> {
    samples.iter().find(|(c, _)| *c == at).map(|(_, o)| *o)
}

/// First occupied cell at or below `start`, at most `depth` cells down.
fn first_occupied_below<S: CellSource + ?Sized>(
    source: &S,
    start: Coordinate,
    depth: i32,
) -> Result<Option<(Coordinate, Occupancy)>, EnvError> {
    for dy in 0..=depth {
        let at = start.below(dy);
        let occupancy = source.occupancy_at(at)?;
        if occupancy.is_occupied() {
            return Ok(Some((at, occupancy)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingResolver, TestWorld, SAND, STONE};
    use nalgebra::Vector3;

    fn settings(timeout: u32) -> WatchSettings {
        WatchSettings {
            zone: DetectionZone::new(1, 2),
            radius: 1,
            timeout_ticks: timeout,
            stage_one_delay: 2,
            stage_two_delay: 3,
            grace_ticks: 3,
            ..WatchSettings::default()
        }
    }

    fn region(world: &TestWorld, anchor: Coordinate, timeout: u32) -> (Watcher, Arc<CountingResolver>) {
        let resolver = Arc::new(CountingResolver::new());
        let watcher = Watcher::new(
            WatcherId::from_seed(1),
            WatchTarget::Region { anchor },
            settings(timeout),
            None,
            resolver.clone(),
            world,
        );
        (watcher, resolver)
    }

    fn run(watcher: &mut Watcher, world: &TestWorld, from: u64, to: u64) -> Vec<TickOutcome> {
        (from..=to).map(|t| watcher.tick(world, t)).collect()
    }

    #[test]
    fn test_new_watcher_snapshots_neighborhood() {
        let world = TestWorld::new();
        let (watcher, _) = region(&world, Coordinate::new(0, 10, 0), 100);
        // radius 1, depth 2 -> 3x3 columns, 4 levels
        assert_eq!(watcher.baseline().len(), 36);
        assert_eq!(watcher.state(), WatcherState::Scanning);
        assert!(!watcher.is_expired());
    }

    #[test]
    fn test_cell_change_walks_both_stages() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, resolver) = region(&world, anchor, 100);

        assert_eq!(w.tick(&world, 1), TickOutcome::Scanning);
        world.place(anchor.below(1), SAND);
        assert_eq!(
            w.tick(&world, 2),
            TickOutcome::Triggered {
                cause: ResolutionCause::CellChanged,
                anchor: anchor.below(1)
            }
        );
        assert_eq!(w.state(), WatcherState::Scheduled { remaining: 2 });

        // stage one: ticks 3, 4; stage two: ticks 5, 6, 7
        assert_eq!(w.tick(&world, 3), TickOutcome::Waiting);
        assert_eq!(w.tick(&world, 4), TickOutcome::Waiting);
        assert_eq!(w.state(), WatcherState::ResumePending { remaining: 3 });
        assert_eq!(w.tick(&world, 5), TickOutcome::Waiting);
        assert_eq!(w.tick(&world, 6), TickOutcome::Waiting);
        assert_eq!(resolver.calls(), 0);

        assert_eq!(
            w.tick(&world, 7),
            TickOutcome::Resumed {
                cause: ResolutionCause::CellChanged,
                anchor: anchor.below(1)
            }
        );
        assert_eq!(resolver.calls(), 1);
        assert_eq!(resolver.last().unwrap().tick, 7);
        assert!(w.is_expired());
    }

    #[test]
    fn test_terminal_watcher_is_inert() {
        let world = TestWorld::new();
        let (mut w, resolver) = region(&world, Coordinate::ORIGIN, 2);
        run(&mut w, &world, 1, 2);
        assert_eq!(resolver.calls(), 1);

        for t in 3..10 {
            assert_eq!(w.tick(&world, t), TickOutcome::Inert);
        }
        assert!(!w.cancel());
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_timeout_resolves_at_last_known() {
        let world = TestWorld::new();
        let anchor = Coordinate::new(4, 20, 4);
        let (mut w, resolver) = region(&world, anchor, 5);

        let outcomes = run(&mut w, &world, 1, 5);
        assert!(outcomes[..4].iter().all(|o| *o == TickOutcome::Scanning));
        assert_eq!(
            outcomes[4],
            TickOutcome::Resumed {
                cause: ResolutionCause::Timeout,
                anchor
            }
        );
        assert_eq!(resolver.calls(), 1);
        assert_eq!(w.state(), WatcherState::Resolved);
    }

    #[test]
    fn test_timeout_cuts_stage_delays_short() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, resolver) = region(&world, anchor, 3);

        world.place(anchor, STONE);
        assert!(matches!(w.tick(&world, 1), TickOutcome::Triggered { .. }));
        assert_eq!(w.tick(&world, 2), TickOutcome::Waiting);
        assert_eq!(
            w.tick(&world, 3),
            TickOutcome::Resumed {
                cause: ResolutionCause::Timeout,
                anchor
            }
        );
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_change_above_anchor_never_triggers() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, resolver) = region(&world, anchor, 30);

        w.tick(&world, 1);
        world.place(anchor.above(1), STONE);
        let outcomes = run(&mut w, &world, 2, 29);
        assert!(outcomes.iter().all(|o| *o == TickOutcome::Scanning));
        assert_eq!(w.baseline().get(&anchor.above(1)), Some(Occupancy::Occupied(STONE)));

        assert!(matches!(w.tick(&world, 30), TickOutcome::Resumed { .. }));
        assert_eq!(resolver.last().unwrap().cause, ResolutionCause::Timeout);
    }

    #[test]
    fn test_sampling_failure_keeps_state_and_retries() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, _) = region(&world, anchor, 100);

        world.place(anchor.below(1), SAND);
        world.set_failing(true);
        assert_eq!(w.tick(&world, 1), TickOutcome::SampleFailed);
        assert_eq!(w.state(), WatcherState::Scanning);
        assert_eq!(w.failed_ticks(), 1);
        assert_eq!(w.baseline().get(&anchor.below(1)), Some(Occupancy::Empty));

        world.set_failing(false);
        assert!(matches!(w.tick(&world, 2), TickOutcome::Triggered { .. }));
    }

    #[test]
    fn test_failed_baseline_is_filled_lazily() {
        let mut world = TestWorld::new();
        world.set_failing(true);
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, _) = region(&world, anchor, 100);
        assert!(w.baseline().is_empty());

        world.set_failing(false);
        world.place(anchor.below(1), SAND);
        // First sighting is silent even though the cell is occupied
        assert_eq!(w.tick(&world, 1), TickOutcome::Scanning);
        assert_eq!(w.baseline().len(), 36);
    }

    #[test]
    fn test_resolver_failure_still_resolves() {
        let world = TestWorld::new();
        let resolver = Arc::new(CountingResolver::failing());
        let mut w = Watcher::new(
            WatcherId::from_seed(2),
            WatchTarget::Region {
                anchor: Coordinate::ORIGIN,
            },
            settings(1),
            None,
            resolver.clone(),
            &world,
        );

        assert!(matches!(w.tick(&world, 1), TickOutcome::ResumeFailed { .. }));
        assert_eq!(w.state(), WatcherState::Resolved);
        assert_eq!(resolver.calls(), 1);
        assert_eq!(w.tick(&world, 2), TickOutcome::Inert);
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_object_watcher_follows_object() {
        let mut world = TestWorld::new();
        let id = world.spawn(Vector3::new(0.5, 20.5, 0.5), Vector3::new(0.0, -1.0, 0.0));
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(3),
            WatchTarget::Object {
                id,
                origin: Coordinate::ORIGIN,
            },
            settings(100),
            None,
            resolver,
            &world,
        );
        assert_eq!(w.last_known(), Coordinate::new(0, 20, 0));

        world.move_object(id, Vector3::new(0.5, 18.5, 0.5));
        assert_eq!(w.tick(&world, 1), TickOutcome::Scanning);
        assert_eq!(w.last_known(), Coordinate::new(0, 18, 0));
        assert_eq!(w.mode(), WatchMode::Object { id });
    }

    #[test]
    fn test_object_settling_on_ground_triggers() {
        let mut world = TestWorld::new();
        world.place(Coordinate::new(0, 9, 0), STONE);
        let id = world.spawn(Vector3::new(0.5, 10.5, 0.5), Vector3::new(0.0, -0.5, 0.0));
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(4),
            WatchTarget::Object {
                id,
                origin: Coordinate::ORIGIN,
            },
            settings(100),
            None,
            resolver,
            &world,
        );

        // Still falling: ground below but too fast
        assert_eq!(w.tick(&world, 1), TickOutcome::Scanning);

        world.set_velocity(id, Vector3::new(0.0, -0.01, 0.0));
        assert_eq!(
            w.tick(&world, 2),
            TickOutcome::Triggered {
                cause: ResolutionCause::ObjectSettled,
                anchor: Coordinate::new(0, 9, 0)
            }
        );
    }

    #[test]
    fn test_vanished_object_grace_then_fallback_anchor() {
        let mut world = TestWorld::new();
        world.place(Coordinate::new(0, 6, 0), STONE);
        let id = world.spawn(Vector3::new(0.5, 10.5, 0.5), Vector3::new(0.0, -1.0, 0.0));
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(5),
            WatchTarget::Object {
                id,
                origin: Coordinate::ORIGIN,
            },
            settings(100),
            None,
            resolver,
            &world,
        );

        assert_eq!(w.tick(&world, 1), TickOutcome::Scanning);
        world.remove_object(id);

        assert_eq!(w.tick(&world, 2), TickOutcome::Scanning);
        assert_eq!(
            w.mode(),
            WatchMode::Region {
                anchor: Coordinate::new(0, 10, 0)
            }
        );
        assert_eq!(w.tick(&world, 3), TickOutcome::Scanning);
        assert_eq!(w.tick(&world, 4), TickOutcome::Scanning);
        // Ground is 4 below the last known cell; found by the downward scan
        assert_eq!(
            w.tick(&world, 5),
            TickOutcome::Triggered {
                cause: ResolutionCause::ObjectVanished,
                anchor: Coordinate::new(0, 6, 0)
            }
        );
    }

    #[test]
    fn test_fallback_prefers_highest_neighbor_column() {
        let mut world = TestWorld::new();
        world.place(Coordinate::new(1, 7, 0), STONE);
        world.place(Coordinate::new(-2, 8, 1), SAND);
        let (w, _) = region(&world, Coordinate::new(0, 10, 0), 100);
        assert_eq!(w.fallback_anchor(&world), Coordinate::new(-2, 8, 1));
    }

    #[test]
    fn test_fallback_expected_material_breaks_height_ties() {
        let mut world = TestWorld::new();
        world.place(Coordinate::new(1, 8, 0), STONE);
        world.place(Coordinate::new(-1, 8, 0), SAND);
        let resolver = Arc::new(CountingResolver::new());
        let w = Watcher::new(
            WatcherId::from_seed(6),
            WatchTarget::Region {
                anchor: Coordinate::new(0, 10, 0),
            },
            WatchSettings {
                expected: Some(SAND),
                ..settings(100)
            },
            None,
            resolver,
            &world,
        );
        assert_eq!(w.fallback_anchor(&world), Coordinate::new(-1, 8, 0));
    }

    #[test]
    fn test_fallback_ground_scan_below_column_depth() {
        let mut world = TestWorld::new();
        world.place(Coordinate::new(0, -10, 0), STONE);
        let (w, _) = region(&world, Coordinate::new(0, 10, 0), 100);
        assert_eq!(w.fallback_anchor(&world), Coordinate::new(0, -10, 0));
    }

    #[test]
    fn test_fallback_to_last_known_in_empty_world() {
        let world = TestWorld::new();
        let anchor = Coordinate::new(3, 50, 3);
        let (w, _) = region(&world, anchor, 100);
        assert_eq!(w.fallback_anchor(&world), anchor);
    }

    #[test]
    fn test_claimed_guard_expires_scanning_watcher() {
        let world = TestWorld::new();
        let guard = GuardToken::new();
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(7),
            WatchTarget::Region {
                anchor: Coordinate::ORIGIN,
            },
            settings(100),
            Some(guard.clone()),
            resolver.clone(),
            &world,
        );

        assert!(guard.try_claim());
        assert_eq!(w.tick(&world, 1), TickOutcome::Superseded);
        assert_eq!(w.state(), WatcherState::Expired);
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_losing_claim_resolves_without_resume() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let guard = GuardToken::new();
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(8),
            WatchTarget::Region { anchor },
            settings(100),
            Some(guard.clone()),
            resolver.clone(),
            &world,
        );

        world.place(anchor, STONE);
        assert!(matches!(w.tick(&world, 1), TickOutcome::Triggered { .. }));
        // Sibling wins while we are already past scanning
        assert!(guard.try_claim());
        let outcomes = run(&mut w, &world, 2, 6);
        assert_eq!(outcomes.last(), Some(&TickOutcome::ClaimLost));
        assert_eq!(w.state(), WatcherState::Resolved);
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_zero_delays_resolve_on_trigger_tick() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let resolver = Arc::new(CountingResolver::new());
        let mut w = Watcher::new(
            WatcherId::from_seed(9),
            WatchTarget::Region { anchor },
            WatchSettings {
                stage_one_delay: 0,
                stage_two_delay: 0,
                ..settings(100)
            },
            None,
            resolver.clone(),
            &world,
        );

        world.place(anchor.below(2), SAND);
        assert_eq!(
            w.tick(&world, 1),
            TickOutcome::Resumed {
                cause: ResolutionCause::CellChanged,
                anchor: anchor.below(2)
            }
        );
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_cancel_never_resolves() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let (mut w, resolver) = region(&world, anchor, 100);

        world.place(anchor, STONE);
        w.tick(&world, 1);
        assert!(w.cancel());
        assert_eq!(w.state(), WatcherState::Expired);
        run(&mut w, &world, 2, 200);
        assert_eq!(resolver.calls(), 0);
    }
}
