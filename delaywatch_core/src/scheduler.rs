//! The tick-driven scheduler.
//!
//! Owns every live watcher and steps each of them exactly once per tick, in
//! insertion order, on the caller's thread. A watcher's transition is visible
//! (through its guard) before the next watcher is evaluated.

use crate::config::{validate_geometry, WatchConfig};
use crate::error::WatchError;
use crate::guard::GuardToken;
use crate::watcher::{TickOutcome, WatchSettings, WatchTarget, Watcher};
use crate::zone::DetectionZone;
use delaywatch_env::{Coordinate, Environment, Material, ObjectId, Resolver, WatcherId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Parameters for one new watcher. Unset fields fall back to the scheduler's
/// [`WatchConfig`].
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub target: WatchTarget,
    pub radius: Option<i32>,
    pub zone: Option<DetectionZone>,
    pub timeout_ticks: Option<u32>,
    pub expected: Option<Material>,
    pub delays: Option<(u32, u32)>,
    pub guard: Option<GuardToken>,
}

impl WatchRequest {
    /// Watch a fixed cell with the given neighborhood radius.
    pub fn region(anchor: Coordinate, radius: i32) -> Self {
        Self::new(WatchTarget::Region { anchor }).with_radius(radius)
    }

    /// Follow a moving object; `origin` is used if it is already gone.
    pub fn object(id: ObjectId, origin: Coordinate) -> Self {
        Self::new(WatchTarget::Object { id, origin })
    }

    fn new(target: WatchTarget) -> Self {
        Self {
            target,
            radius: None,
            zone: None,
            timeout_ticks: None,
            expected: None,
            delays: None,
            guard: None,
        }
    }

    pub fn with_radius(mut self, radius: i32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_zone(mut self, horizontal: i32, vertical_below: i32) -> Self {
        self.zone = Some(DetectionZone::new(horizontal, vertical_below));
        self
    }

    pub fn with_timeout(mut self, ticks: u32) -> Self {
        self.timeout_ticks = Some(ticks);
        self
    }

    /// Only trigger on this material.
    pub fn expecting(mut self, material: Material) -> Self {
        self.expected = Some(material);
        self
    }

    /// Overrides both stage delays.
    pub fn with_delays(mut self, stage_one: u32, stage_two: u32) -> Self {
        self.delays = Some((stage_one, stage_two));
        self
    }

    /// Shares a guard with sibling watchers.
    pub fn with_guard(mut self, guard: GuardToken) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Effective settings under `config`.
    ///
    /// A region watcher that shares a guard defaults to the passive stage-one
    /// delay so its object-watching sibling gets to resolve first.
    pub fn settings(&self, config: &WatchConfig) -> WatchSettings {
        let mut settings = WatchSettings::from_config(config);
        if let Some(radius) = self.radius {
            settings.radius = radius;
        }
        if let Some(zone) = self.zone {
            settings.zone = zone;
        }
        if let Some(timeout) = self.timeout_ticks {
            settings.timeout_ticks = timeout;
        }
        settings.expected = self.expected;

        match (self.delays, self.target, &self.guard) {
            (Some((one, two)), _, _) => {
                settings.stage_one_delay = one;
                settings.stage_two_delay = two;
            }
            (None, WatchTarget::Region { .. }, Some(_)) => {
                settings.stage_one_delay = config.passive_stage_one_delay;
            }
            (None, _, _) => {}
        }
        settings
    }
}

/// Counts for one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub scanned: usize,
    pub waiting: usize,
    pub triggered: usize,
    pub resumed: usize,
    pub resume_failures: usize,
    pub claims_lost: usize,
    pub sample_failures: usize,
    pub superseded: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Inert => {}
            TickOutcome::Scanning => self.scanned += 1,
            TickOutcome::Waiting => self.waiting += 1,
            TickOutcome::SampleFailed => self.sample_failures += 1,
            TickOutcome::Triggered { .. } => self.triggered += 1,
            TickOutcome::Superseded => self.superseded += 1,
            TickOutcome::Resumed { .. } => self.resumed += 1,
            TickOutcome::ResumeFailed { .. } => self.resume_failures += 1,
            TickOutcome::ClaimLost => self.claims_lost += 1,
        }
    }

    /// Resolver invocations this tick, successful or not.
    pub fn resolver_calls(&self) -> usize {
        self.resumed + self.resume_failures
    }
}

/// Single-threaded owner of all live watchers.
pub struct Scheduler {
    config: WatchConfig,
    watchers: Vec<Watcher>,
    tick_count: u64,
    next_seq: u64,
}

impl Scheduler {
    /// Creates a scheduler after validating `config`.
    pub fn new(config: WatchConfig) -> Result<Self, WatchError> {
        config.validate()?;
        Ok(Self {
            config,
            watchers: Vec::new(),
            tick_count: 0,
            next_seq: 0,
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Registers a watcher and takes its baseline snapshot.
    ///
    /// Only the request geometry can fail; a failing snapshot is logged by the
    /// watcher and filled in lazily.
    pub fn add_watcher(
        &mut self,
        env: &dyn Environment,
        request: WatchRequest,
        resolver: Arc<dyn Resolver>,
    ) -> Result<WatcherId, WatchError> {
        let settings = request.settings(&self.config);
        validate_geometry(settings.radius, &settings.zone)?;

        self.next_seq += 1;
        let id = WatcherId::from_seed(self.next_seq);
        let watcher = Watcher::new(id, request.target, settings, request.guard, resolver, env);
        self.watchers.push(watcher);
        Ok(id)
    }

    /// Steps every live watcher once, in insertion order.
    pub fn tick(&mut self, env: &dyn Environment) -> TickReport {
        self.tick_count += 1;
        let now = self.tick_count;
        let mut report = TickReport {
            tick: now,
            ..TickReport::default()
        };

        for watcher in self.watchers.iter_mut() {
            let outcome = watcher.tick(env, now);
            report.record(&outcome);
        }

        if report.triggered + report.resolver_calls() + report.claims_lost > 0 {
            debug!(
                "tick {}: {} triggered, {} resumed, {} claims lost, {} live",
                now,
                report.triggered,
                report.resolver_calls(),
                report.claims_lost,
                self.live()
            );
        }
        report
    }

    /// Drops terminal watchers and returns their ids.
    pub fn reap(&mut self) -> Vec<WatcherId> {
        let mut reaped = Vec::new();
        self.watchers.retain(|w| {
            if w.is_expired() {
                reaped.push(w.id());
                false
            } else {
                true
            }
        });
        reaped
    }

    /// `tick()` followed by `reap()`.
    pub fn step(&mut self, env: &dyn Environment) -> TickReport {
        let report = self.tick(env);
        self.reap();
        report
    }

    /// Cancels one watcher; it will never resolve.
    ///
    /// Cancelling a watcher that is already terminal but not yet reaped is a
    /// no-op. Only ids the scheduler no longer holds are an error.
    pub fn cancel(&mut self, id: WatcherId) -> Result<(), WatchError> {
        match self.watchers.iter_mut().find(|w| w.id() == id) {
            Some(watcher) => {
                watcher.cancel();
                Ok(())
            }
            None => Err(WatchError::UnknownWatcher(id)),
        }
    }

    /// Cancels every live watcher (world unload). Returns how many were live.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for watcher in self.watchers.iter_mut() {
            if watcher.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("cancelled {} watchers at tick {}", cancelled, self.tick_count);
        }
        cancelled
    }

    pub fn watcher(&self, id: WatcherId) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.id() == id)
    }

    pub fn watchers(&self) -> impl Iterator<Item = &Watcher> {
        self.watchers.iter()
    }

    /// Watchers held, including terminal ones not yet reaped.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Watchers not yet terminal.
    pub fn live(&self) -> usize {
        self.watchers.iter().filter(|w| !w.is_expired()).count()
    }

    /// Ticks run so far; the first tick is tick 1.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            config: WatchConfig::default(),
            watchers: Vec::new(),
            tick_count: 0,
            next_seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingResolver, TestWorld, SAND, STONE};
    use crate::watcher::{WatchMode, WatcherState};
    use delaywatch_env::ResolutionCause;
    use nalgebra::Vector3;
    use proptest::prelude::*;

    fn resolver() -> Arc<CountingResolver> {
        Arc::new(CountingResolver::new())
    }

    #[test]
    fn test_rejects_invalid_requests() {
        let world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let r = resolver();

        let err = scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::ORIGIN, -1), r.clone())
            .unwrap_err();
        assert!(matches!(err, WatchError::InvalidRadius(-1)));

        let err = scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::ORIGIN, 40), r)
            .unwrap_err();
        assert!(matches!(err, WatchError::NeighborhoodTooLarge { .. }));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = WatchConfig {
            neighborhood_radius: -3,
            ..Default::default()
        };
        assert!(Scheduler::new(config).is_err());
    }

    #[test]
    fn test_idle_region_resolves_exactly_at_timeout() {
        let world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let anchor = Coordinate::new(5, 64, 5);
        let id = scheduler
            .add_watcher(
                &world,
                WatchRequest::region(anchor, 1).with_zone(1, 2).with_timeout(1200),
                r.clone(),
            )
            .unwrap();

        for _ in 0..1199 {
            scheduler.step(&world);
        }
        assert_eq!(r.calls(), 0);
        assert_eq!(scheduler.watcher(id).unwrap().state(), WatcherState::Scanning);

        let report = scheduler.step(&world);
        assert_eq!(report.tick, 1200);
        assert_eq!(report.resumed, 1);
        assert_eq!(r.calls(), 1);
        let ctx = r.last().unwrap();
        assert_eq!(ctx.anchor, anchor);
        assert_eq!(ctx.cause, ResolutionCause::Timeout);
        assert_eq!(ctx.tick, 1200);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_guard_siblings_resume_once() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let guard = GuardToken::new();

        let id = world.spawn(Vector3::new(0.5, 14.5, 0.5), Vector3::new(0.0, -1.0, 0.0));
        scheduler
            .add_watcher(
                &world,
                WatchRequest::object(id, anchor.above(4))
                    .with_delays(10, 10)
                    .with_guard(guard.clone()),
                r.clone(),
            )
            .unwrap();
        scheduler
            .add_watcher(
                &world,
                WatchRequest::region(anchor, 1)
                    .with_delays(10, 10)
                    .with_guard(guard.clone()),
                r.clone(),
            )
            .unwrap();

        // Both see the same new cell on the same tick
        world.place(anchor, SAND);
        world.place(anchor.above(3), SAND);
        let report = scheduler.step(&world);
        assert_eq!(report.triggered, 2);

        let mut claims_lost = 0;
        for _ in 0..30 {
            claims_lost += scheduler.step(&world).claims_lost;
        }
        assert_eq!(r.calls(), 1);
        assert_eq!(claims_lost, 1);
        assert!(guard.is_claimed());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_zone_wider_than_radius_still_triggers() {
        let mut world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let anchor = Coordinate::new(0, 10, 0);
        let id = scheduler
            .add_watcher(
                &world,
                WatchRequest::region(anchor, 0)
                    .with_zone(1, 2)
                    .with_delays(0, 0)
                    .with_timeout(50),
                r.clone(),
            )
            .unwrap();

        world.place(anchor.offset(1, -1, 0), STONE);
        let report = scheduler.tick(&world);
        assert_eq!(report.triggered + report.resumed, 1);
        assert_eq!(r.calls(), 1);
        let ctx = r.last().unwrap();
        assert_eq!(ctx.cause, ResolutionCause::CellChanged);
        assert_eq!(ctx.anchor, anchor.offset(1, -1, 0));
        assert_eq!(scheduler.watcher(id).unwrap().state(), WatcherState::Resolved);
    }

    #[test]
    fn test_report_separates_waiting_from_scanning() {
        let mut world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let anchor = Coordinate::new(0, 10, 0);
        scheduler
            .add_watcher(&world, WatchRequest::region(anchor, 1).with_delays(3, 3), resolver())
            .unwrap();
        scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::new(30, 10, 30), 1), resolver())
            .unwrap();

        world.place(anchor.below(1), SAND);
        let report = scheduler.tick(&world);
        assert_eq!(report.triggered, 1);
        assert_eq!(report.scanned, 1);

        let report = scheduler.tick(&world);
        assert_eq!(report.waiting, 1);
        assert_eq!(report.scanned, 1);
    }

    #[test]
    fn test_passive_delay_for_guarded_region() {
        let config = WatchConfig::default();
        let guarded = WatchRequest::region(Coordinate::ORIGIN, 1).with_guard(GuardToken::new());
        assert_eq!(guarded.settings(&config).stage_one_delay, 6);

        let plain = WatchRequest::region(Coordinate::ORIGIN, 1);
        assert_eq!(plain.settings(&config).stage_one_delay, 1);

        let object = WatchRequest::object(ObjectId(1), Coordinate::ORIGIN).with_guard(GuardToken::new());
        assert_eq!(object.settings(&config).stage_one_delay, 1);

        let explicit = guarded.with_delays(10, 10);
        assert_eq!(explicit.settings(&config).stage_one_delay, 10);
    }

    #[test]
    fn test_cancel_and_cancel_all() {
        let world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let a = scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::ORIGIN, 1), r.clone())
            .unwrap();
        scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::new(9, 0, 9), 1), r.clone())
            .unwrap();
        scheduler
            .add_watcher(&world, WatchRequest::region(Coordinate::new(-9, 0, 9), 1), r.clone())
            .unwrap();

        scheduler.cancel(a).unwrap();
        assert_eq!(scheduler.watcher(a).unwrap().state(), WatcherState::Expired);
        // Terminal but not reaped: still a no-op success
        assert!(scheduler.cancel(a).is_ok());
        assert_eq!(scheduler.live(), 2);
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.cancel_all(), 0);
        assert_eq!(scheduler.reap().len(), 3);
        assert!(matches!(scheduler.cancel(a), Err(WatchError::UnknownWatcher(_))));

        for _ in 0..2000 {
            scheduler.step(&world);
        }
        assert_eq!(r.calls(), 0);
    }

    #[test]
    fn test_insertion_order_guard_visibility() {
        let mut world = TestWorld::new();
        let anchor = Coordinate::new(0, 10, 0);
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let guard = GuardToken::new();

        // First watcher resolves on the trigger tick
        scheduler
            .add_watcher(
                &world,
                WatchRequest::region(anchor, 1)
                    .with_delays(0, 0)
                    .with_guard(guard.clone()),
                r.clone(),
            )
            .unwrap();
        let second = scheduler
            .add_watcher(
                &world,
                WatchRequest::region(Coordinate::new(20, 10, 20), 1).with_guard(guard.clone()),
                r.clone(),
            )
            .unwrap();

        world.place(anchor, STONE);
        let report = scheduler.tick(&world);
        assert_eq!(report.resumed, 1);
        // Second watcher saw the claim within the same tick
        assert_eq!(report.superseded, 1);
        assert_eq!(scheduler.watcher(second).unwrap().state(), WatcherState::Expired);
    }

    #[test]
    fn test_object_watcher_degrades_when_removed() {
        let mut world = TestWorld::new();
        let mut scheduler = Scheduler::default();
        let r = resolver();
        let body = world.spawn(Vector3::new(2.5, 30.5, 2.5), Vector3::new(0.0, -1.0, 0.0));
        let id = scheduler
            .add_watcher(&world, WatchRequest::object(body, Coordinate::ORIGIN), r)
            .unwrap();

        scheduler.step(&world);
        world.remove_object(body);
        scheduler.step(&world);
        assert_eq!(
            scheduler.watcher(id).unwrap().mode(),
            WatchMode::Region {
                anchor: Coordinate::new(2, 30, 2)
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_guard_group_resumes_at_most_once(
            siblings in 1usize..5,
            edits in proptest::collection::vec((0u64..40, -2i32..=2, -3i32..=1, -2i32..=2), 0..12),
            delays in (0u32..4, 0u32..4),
            timeout in 1u32..60,
        ) {
            let mut world = TestWorld::new();
            let mut scheduler = Scheduler::default();
            let r = resolver();
            let guard = GuardToken::new();
            let anchor = Coordinate::new(0, 10, 0);

            for i in 0..siblings {
                scheduler
                    .add_watcher(
                        &world,
                        WatchRequest::region(anchor.offset(i as i32, 0, 0), 1)
                            .with_zone(1, 2)
                            .with_timeout(timeout)
                            .with_delays(delays.0, delays.1)
                            .with_guard(guard.clone()),
                        r.clone(),
                    )
                    .unwrap();
            }

            for t in 0..80u64 {
                for &(at, dx, dy, dz) in &edits {
                    if at == t {
                        world.place(anchor.offset(dx, dy, dz), STONE);
                    }
                }
                scheduler.step(&world);
            }

            prop_assert_eq!(r.calls(), 1);
            prop_assert!(scheduler.is_empty());
        }

        #[test]
        fn test_unchanging_world_resolves_at_timeout(timeout in 1u32..200, radius in 0i32..3) {
            let world = TestWorld::new();
            let mut scheduler = Scheduler::default();
            let r = resolver();
            scheduler
                .add_watcher(
                    &world,
                    WatchRequest::region(Coordinate::new(1, 5, 1), radius).with_timeout(timeout),
                    r.clone(),
                )
                .unwrap();

            let mut resolved_at = None;
            for _ in 0..timeout + 5 {
                let report = scheduler.step(&world);
                if report.resumed > 0 {
                    prop_assert!(resolved_at.is_none());
                    resolved_at = Some(report.tick);
                }
            }
            prop_assert_eq!(resolved_at, Some(u64::from(timeout)));
            prop_assert_eq!(r.calls(), 1);
        }
    }
}
