//! Scenario runner - executes the watcher scenarios against a SimWorld.

use crate::exporter::SimExport;
use crate::resolver::RecordingResolver;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld, StepEvents, WorldEdit, LOG, SAND, STONE};

use delaywatch_core::{
    GuardToken, Impact, ImpactOutcome, ImpactPlanner, Scheduler, TickReport, WatchError,
    WatchMode, WatchRequest,
};
use delaywatch_env::{Coordinate, ResolutionCause, ResumeContext, WatcherId};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Every accepted resume, ordered by tick
    pub resumes: Vec<ResumeContext>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    /// Watchers registered (directly or by the impact planner)
    pub watchers_created: usize,

    /// Watchers that left scanning
    pub triggers: usize,

    /// Resolver calls made by watchers
    pub resumes: usize,

    /// Resolver calls that returned an error
    pub resume_failures: usize,

    /// Watchers that reached resolution after a sibling had claimed
    pub claims_lost: usize,

    /// Watchers expired while scanning because a sibling had claimed
    pub superseded: usize,

    /// Watcher ticks whose sampling failed
    pub sample_failures: usize,

    /// Impacts resolved without a watcher
    pub immediate_resolutions: usize,

    /// Resumes rejected by a self-guarding resolver
    pub duplicate_resumes: u64,

    /// Bodies that landed
    pub landings: usize,

    /// First tick on which any watcher left scanning
    pub first_trigger_tick: Option<u64>,
}

impl ScenarioMetrics {
    fn record(&mut self, report: &TickReport, events: &StepEvents) {
        self.triggers += report.triggered;
        self.resumes += report.resolver_calls();
        self.resume_failures += report.resume_failures;
        self.claims_lost += report.claims_lost;
        self.superseded += report.superseded;
        self.sample_failures += report.sample_failures;
        self.landings += events.landed.len();
        if report.triggered > 0 && self.first_trigger_tick.is_none() {
            self.first_trigger_tick = Some(report.tick);
        }
    }
}

/// One scenario's world, scheduler and bookkeeping.
struct Harness {
    world: SimWorld,
    scheduler: Scheduler,
    planner: ImpactPlanner,
    resolvers: Vec<Arc<RecordingResolver>>,
    metrics: ScenarioMetrics,
    export: Option<SimExport>,
    tick_rate_hz: u32,
    max_ticks: u64,
}

impl Harness {
    fn new(config: &SimConfig, max_ticks: u64, export: Option<SimExport>) -> Result<Self, WatchError> {
        Ok(Self {
            world: SimWorld::new(config),
            scheduler: Scheduler::new(config.watch.clone())?,
            planner: ImpactPlanner::new(config.impact.clone()),
            resolvers: Vec::new(),
            metrics: ScenarioMetrics::default(),
            export,
            tick_rate_hz: config.tick_rate_hz,
            max_ticks,
        })
    }

    /// A fresh resolver standing for one logical event.
    fn resolver(&mut self, label: impl Into<String>) -> Arc<RecordingResolver> {
        let resolver = Arc::new(RecordingResolver::new(label));
        self.resolvers.push(resolver.clone());
        resolver
    }

    fn watch(&mut self, request: WatchRequest, resolver: &Arc<RecordingResolver>) -> Result<WatcherId, String> {
        let id = self
            .scheduler
            .add_watcher(&self.world, request, resolver.clone())
            .map_err(|e| format!("add_watcher failed: {}", e))?;
        self.metrics.watchers_created += 1;
        Ok(id)
    }

    fn impact(&mut self, impact: &Impact, resolver: &Arc<RecordingResolver>) -> Result<ImpactOutcome, String> {
        let outcome = self
            .planner
            .plan(&mut self.scheduler, &self.world, impact, resolver.clone())
            .map_err(|e| format!("impact planning failed: {}", e))?;
        match &outcome {
            ImpactOutcome::Watching(ids) => self.metrics.watchers_created += ids.len(),
            ImpactOutcome::ResolvedImmediately { .. } => self.metrics.immediate_resolutions += 1,
        }
        Ok(outcome)
    }

    fn step(&mut self) -> TickReport {
        let events = self.world.step();
        let report = self.scheduler.step(&self.world);
        self.metrics.record(&report, &events);
        if let Some(export) = self.export.as_mut() {
            export.record(&self.world, &report, &events, self.scheduler.len(), self.tick_rate_hz);
        }
        report
    }

    /// Steps until every watcher is gone or the tick budget runs out.
    fn run_until_idle(&mut self) -> u64 {
        while !self.scheduler.is_empty() && self.world.tick() < self.max_ticks {
            self.step();
        }
        self.world.tick()
    }

    /// Accepted resumes across all resolvers, by tick.
    fn resumes(&self) -> Vec<ResumeContext> {
        let mut all: Vec<ResumeContext> = self.resolvers.iter().flat_map(|r| r.records()).collect();
        all.sort_by_key(|c| c.tick);
        all
    }

    fn finish(
        mut self,
        scenario: ScenarioId,
        seed: u64,
        verdict: Result<(), String>,
    ) -> (ScenarioResult, Option<SimExport>) {
        self.metrics.duplicate_resumes = self.resolvers.iter().map(|r| r.duplicates()).sum();

        let verdict = verdict.and_then(|()| {
            check(self.metrics.duplicate_resumes == 0, || {
                format!("{} duplicate resumes", self.metrics.duplicate_resumes)
            })
        });

        let resumes = self.resumes();
        let total_ticks = self.world.tick();
        let passed = verdict.is_ok();
        if let Some(export) = self.export.as_mut() {
            export.finalize(passed, resumes.clone());
        }

        let result = ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks,
            final_time_secs: total_ticks as f64 / f64::from(self.tick_rate_hz.max(1)),
            resumes,
            failure_reason: verdict.err(),
            metrics: self.metrics,
        };
        (result, self.export)
    }
}

fn check(condition: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

/// Exactly one accepted resume on `resolver`, returned.
fn single_resume(resolver: &RecordingResolver) -> Result<ResumeContext, String> {
    let records = resolver.records();
    match records.as_slice() {
        [only] => Ok(only.clone()),
        other => Err(format!("{}: expected 1 resume, got {}", resolver.label(), other.len())),
    }
}

/// An impact queued for a later tick in the barrage.
#[derive(Debug, Clone, Copy)]
enum Strike {
    /// Drop a body and hit the floor under it
    UnderBody { x: i32, z: i32, height: f64 },

    /// Hit a cell directly
    OnCell(Coordinate),

    /// Drop a body and hit the body itself
    OnBody { x: i32, z: i32, height: f64 },
}

/// Runs watcher scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// World and scheduler configuration
    config: SimConfig,

    /// Tick budget per scenario
    max_ticks: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self::with_config(SimConfig {
            seed,
            ..SimConfig::default()
        })
    }

    /// Creates a runner from a full config.
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            seed: config.seed,
            max_ticks: config.max_ticks,
            config,
        }
    }

    /// Sets the tick budget.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = ticks;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario and also returns its timeline.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let export = SimExport::new(scenario.name(), self.seed);
        let (result, export) = self.execute(scenario, Some(export));
        let export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: Option<SimExport>) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let mut harness = match Harness::new(&self.config, self.max_ticks, export) {
            Ok(harness) => harness,
            Err(e) => {
                warn!("scenario {} not started: {}", scenario.name(), e);
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    resumes: Vec::new(),
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, None);
            }
        };

        let verdict = match scenario {
            ScenarioId::IdleTimeout => self.run_idle_timeout(&mut harness),
            ScenarioId::GuardRace => self.run_guard_race(&mut harness),
            ScenarioId::VanishedObject => self.run_vanished_object(&mut harness),
            ScenarioId::OutsideZone => self.run_outside_zone(&mut harness),
            ScenarioId::FallingBlock => self.run_falling_block(&mut harness),
            ScenarioId::FlakySampling => self.run_flaky_sampling(&mut harness),
            ScenarioId::Barrage => self.run_barrage(&mut harness),
        };

        harness.finish(scenario, self.seed, verdict)
    }

    /// DW-001: a region watcher over an unchanging world.
    fn run_idle_timeout(&self, h: &mut Harness) -> Result<(), String> {
        let anchor = Coordinate::new(0, 64, 0);
        let resolver = h.resolver("idle");
        h.watch(
            WatchRequest::region(anchor, 1).with_zone(1, 2).with_timeout(1200),
            &resolver,
        )?;

        let ticks = h.run_until_idle();
        let resume = single_resume(&resolver)?;

        check(resume.tick == 1200, || format!("resumed at tick {}, expected 1200", resume.tick))?;
        check(resume.anchor == anchor, || format!("anchor {} != {}", resume.anchor, anchor))?;
        check(resume.cause == ResolutionCause::Timeout, || format!("cause {}", resume.cause))?;
        info!("✓ IdleTimeout complete: resumed once at tick {} ({} ticks run)", resume.tick, ticks);
        Ok(())
    }

    /// DW-002: object watcher detects at tick 5, region watcher at tick 6.
    fn run_guard_race(&self, h: &mut Harness) -> Result<(), String> {
        let body_cell = Coordinate::new(0, 20, 0);
        let region_anchor = Coordinate::new(10, 5, 10);
        let body = h.world.spawn_hovering(Vector3::new(0.5, 20.5, 0.5), SAND);

        let resolver = h.resolver("race");
        let guard = GuardToken::new();
        h.watch(
            WatchRequest::object(body, body_cell)
                .with_delays(10, 10)
                .with_guard(guard.clone()),
            &resolver,
        )?;
        h.watch(
            WatchRequest::region(region_anchor, 1)
                .with_delays(10, 10)
                .with_guard(guard),
            &resolver,
        )?;

        h.world.schedule(5, WorldEdit::Place(body_cell.below(2), STONE));
        h.world.schedule(6, WorldEdit::Place(region_anchor.below(1), STONE));

        h.run_until_idle();
        let resume = single_resume(&resolver)?;

        check(h.metrics.first_trigger_tick == Some(5), || {
            format!("first trigger at {:?}, expected tick 5", h.metrics.first_trigger_tick)
        })?;
        check(h.metrics.triggers == 2, || format!("{} triggers, expected 2", h.metrics.triggers))?;
        check(resume.tick <= 25, || format!("resumed at tick {}, expected <= 25", resume.tick))?;
        check(resume.anchor == body_cell.below(2), || format!("anchor {}", resume.anchor))?;
        check(h.metrics.claims_lost == 1, || format!("{} claims lost, expected 1", h.metrics.claims_lost))?;
        info!(
            "✓ GuardRace complete: one resume at tick {}, {} claim lost",
            resume.tick, h.metrics.claims_lost
        );
        Ok(())
    }

    /// DW-003: the tracked object is removed at tick 3 with nothing below it.
    fn run_vanished_object(&self, h: &mut Harness) -> Result<(), String> {
        let cell = Coordinate::new(4, 30, 4);
        let body = h.world.spawn_hovering(Vector3::new(4.5, 30.5, 4.5), SAND);
        h.world.schedule(3, WorldEdit::RemoveObject(body));

        let resolver = h.resolver("vanished");
        h.watch(WatchRequest::object(body, cell), &resolver)?;

        h.run_until_idle();
        let resume = single_resume(&resolver)?;

        check(h.metrics.first_trigger_tick == Some(6), || {
            format!("left scanning at {:?}, expected tick 6", h.metrics.first_trigger_tick)
        })?;
        check(resume.anchor == cell, || format!("anchor {} != last known {}", resume.anchor, cell))?;
        check(resume.cause == ResolutionCause::ObjectVanished, || format!("cause {}", resume.cause))?;
        info!("✓ VanishedObject complete: left scanning at tick 6, resumed at tick {}", resume.tick);
        Ok(())
    }

    /// DW-004: a cell appears directly above the anchor.
    ///
    /// A cell inside the zone is also cleared; emptying never triggers either.
    fn run_outside_zone(&self, h: &mut Harness) -> Result<(), String> {
        let anchor = Coordinate::new(0, 10, 0);
        let ledge = anchor.below(2);
        let timeout = 300;
        h.world.place(ledge, STONE);

        let resolver = h.resolver("outside");
        h.watch(
            WatchRequest::region(anchor, 1).with_zone(1, 2).with_timeout(timeout),
            &resolver,
        )?;
        h.world.schedule(10, WorldEdit::Place(anchor.above(1), STONE));
        h.world.schedule(20, WorldEdit::Clear(ledge));

        h.run_until_idle();
        let resume = single_resume(&resolver)?;

        check(h.world.material_at(ledge).is_none(), || format!("{} was not cleared", ledge))?;
        check(h.metrics.triggers == 0, || format!("{} triggers, expected none", h.metrics.triggers))?;
        check(resume.tick == u64::from(timeout), || format!("resumed at tick {}", resume.tick))?;
        check(resume.cause == ResolutionCause::Timeout, || format!("cause {}", resume.cause))?;
        info!("✓ OutsideZone complete: no trigger, timed out at tick {}", resume.tick);
        Ok(())
    }

    /// DW-005: impact on the floor under a falling sand body.
    ///
    /// A prop hovers right next to the hit point; the planner must skip it and
    /// pick the sand body twelve cells up.
    fn run_falling_block(&self, h: &mut Harness) -> Result<(), String> {
        h.world.fill_floor(0, 6, STONE);
        let sand = h.world.spawn_falling(Vector3::new(0.5, 12.5, 0.5), SAND);
        let prop = h.world.spawn_prop(Vector3::new(1.5, 1.5, 0.5), LOG);

        let resolver = h.resolver("falling");
        let outcome = h.impact(&Impact::on_cell(Coordinate::ORIGIN), &resolver)?;
        let watchers = match outcome {
            ImpactOutcome::Watching(ids) => ids.len(),
            ImpactOutcome::ResolvedImmediately { .. } => 0,
        };
        check(watchers == 2, || format!("planner created {} watchers, expected 2", watchers))?;
        let tracked = h.scheduler.watchers().find_map(|w| match w.mode() {
            WatchMode::Object { id } => Some(id),
            WatchMode::Region { .. } => None,
        });
        check(tracked == Some(sand), || {
            format!("planner tracked {:?}, expected {} (prop {})", tracked, sand, prop)
        })?;

        h.run_until_idle();
        let resume = single_resume(&resolver)?;
        let landed = Coordinate::new(0, 1, 0);

        check(h.metrics.landings == 1, || format!("{} landings", h.metrics.landings))?;
        check(h.world.material_at(landed) == Some(SAND), || format!("no sand at {}", landed))?;
        check(resume.anchor == landed, || format!("anchor {} != landing {}", resume.anchor, landed))?;
        check(h.metrics.claims_lost + h.metrics.superseded == 1, || {
            "region sibling did not stand down".to_string()
        })?;
        info!(
            "✓ FallingBlock complete: landed at {}, resumed at tick {} ({})",
            landed, resume.tick, resume.cause
        );
        Ok(())
    }

    /// DW-006: a change lands during five faulty ticks.
    fn run_flaky_sampling(&self, h: &mut Harness) -> Result<(), String> {
        let anchor = Coordinate::new(0, 10, 0);
        let resolver = h.resolver("flaky");
        h.watch(WatchRequest::region(anchor, 1).with_zone(1, 2), &resolver)?;

        for tick in 3..=7 {
            h.world.inject_fault(tick);
        }
        h.world.schedule(4, WorldEdit::Place(anchor.below(1), SAND));

        h.run_until_idle();
        let resume = single_resume(&resolver)?;

        check(h.metrics.sample_failures == 5, || {
            format!("{} failed ticks, expected 5", h.metrics.sample_failures)
        })?;
        check(h.metrics.first_trigger_tick == Some(8), || {
            format!("triggered at {:?}, expected tick 8", h.metrics.first_trigger_tick)
        })?;
        check(resume.anchor == anchor.below(1), || format!("anchor {}", resume.anchor))?;
        check(resume.cause == ResolutionCause::CellChanged, || format!("cause {}", resume.cause))?;
        info!("✓ FlakySampling complete: recovered at tick 8, resumed at tick {}", resume.tick);
        Ok(())
    }

    /// DW-007: seeded random impacts, bodies and faults.
    fn run_barrage(&self, h: &mut Harness) -> Result<(), String> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        h.world.fill_floor(0, 24, STONE);

        let mut loose = Vec::new();
        for _ in 0..20 {
            let at = Coordinate::new(rng.gen_range(-20..=20), 1, rng.gen_range(-20..=20));
            let material = if rng.gen_bool(0.5) { SAND } else { LOG };
            h.world.place(at, material);
            loose.push(at);
        }

        let mut strikes: Vec<(u64, Strike)> = (0..16)
            .map(|_| {
                let tick = rng.gen_range(1..120);
                let x = rng.gen_range(-20..=20);
                let z = rng.gen_range(-20..=20);
                let height = rng.gen_range(6.0..20.0);
                let strike = match rng.gen_range(0..3) {
                    0 => Strike::UnderBody { x, z, height },
                    1 if rng.gen_bool(0.5) => Strike::OnCell(loose[rng.gen_range(0..loose.len())]),
                    1 => Strike::OnCell(Coordinate::new(x, 0, z)),
                    _ => Strike::OnBody { x, z, height },
                };
                (tick, strike)
            })
            .collect();
        strikes.sort_by_key(|(tick, _)| *tick);
        let mut pending: VecDeque<(u64, Strike)> = strikes.into();

        for tick in 1..400 {
            if rng.gen_bool(0.03) {
                h.world.inject_fault(tick);
            }
        }

        let mut events = 0;
        while h.world.tick() < h.max_ticks {
            let next = h.world.tick() + 1;
            while pending.front().map_or(false, |(tick, _)| *tick <= next) {
                let Some((_, strike)) = pending.pop_front() else {
                    break;
                };
                events += 1;
                let resolver = h.resolver(format!("event-{}", events));
                let impact = match strike {
                    Strike::UnderBody { x, z, height } => {
                        h.world.spawn_falling(
                            Vector3::new(f64::from(x) + 0.5, height, f64::from(z) + 0.5),
                            SAND,
                        );
                        Impact::on_cell(Coordinate::new(x, 0, z))
                    }
                    Strike::OnCell(cell) => Impact::on_cell(cell),
                    Strike::OnBody { x, z, height } => {
                        let point = Vector3::new(f64::from(x) + 0.5, height, f64::from(z) + 0.5);
                        let body = h.world.spawn_falling(point, SAND);
                        Impact::on_object(body, point)
                    }
                };
                debug!("barrage: event {} {:?}", events, strike);
                h.impact(&impact, &resolver)?;
            }

            h.step();
            if pending.is_empty() && h.scheduler.is_empty() {
                break;
            }
        }

        check(pending.is_empty() && h.scheduler.is_empty(), || {
            format!(
                "{} impacts pending and {} watchers live after {} ticks",
                pending.len(),
                h.scheduler.len(),
                h.world.tick()
            )
        })?;
        for resolver in &h.resolvers {
            check(resolver.resume_count() == 1, || {
                format!("{} resumed {} times", resolver.label(), resolver.resume_count())
            })?;
        }
        info!(
            "✓ Barrage complete: {} events, {} watchers, {} immediate, {} failed ticks",
            events,
            h.metrics.watchers_created,
            h.metrics.immediate_resolutions,
            h.metrics.sample_failures
        );
        Ok(())
    }
}
