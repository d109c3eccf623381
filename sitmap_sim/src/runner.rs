//! Scenario runner - executes aggregation scenarios against a virtual clock.

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::{source_id, Oracle};
use crate::scenarios::ScenarioId;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sitmap_core::{
    Coordinate, Observation, ObservationId, ObservationReport, RenderModel, RenderOptions,
    SitmapConfig, SitmapEngine,
};
use sitmap_env::{ChannelId, ManualContext, SitmapContext};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Channel every scenario reports into.
pub const SIM_CHANNEL: ChannelId = ChannelId(1);

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Observations stored at the end
    pub final_observation_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Reports handed to the engine
    pub reports_ingested: u64,

    /// Reports rejected for lack of a location
    pub reports_rejected: u64,

    /// Render calls
    pub renders: u64,

    /// Clusters in the last non-empty render
    pub last_cluster_count: usize,
}

/// One scenario execution: engine, clock, oracle and bookkeeping.
struct Session {
    ctx: Arc<ManualContext>,
    engine: SitmapEngine<ManualContext>,
    oracle: Oracle,
    start: DateTime<Utc>,
    metrics: ScenarioMetrics,
    export: Option<SimExport>,
}

impl Session {
    fn ingest(&mut self, report: ObservationReport) -> Option<Observation> {
        self.metrics.reports_ingested += 1;
        let result = self.engine.upsert(report);
        if result.is_none() {
            self.metrics.reports_rejected += 1;
        }
        result
    }

    /// Report every event once from `observer`.
    fn report_all(&mut self, observer: usize) -> Vec<Observation> {
        let ids: Vec<u64> = self.oracle.events().map(|e| e.id).collect();
        let mut stored = Vec::with_capacity(ids.len());
        for id in ids {
            let report = self
                .oracle
                .generate_report(SIM_CHANNEL, id, observer, ChronoDuration::zero());
            if let Some(obs) = report.and_then(|r| self.ingest(r)) {
                stored.push(obs);
            }
        }
        stored
    }

    fn render(&mut self, options: RenderOptions) -> Option<RenderModel> {
        self.metrics.renders += 1;
        let model = self.engine.render_model(SIM_CHANNEL, options)?;
        self.metrics.last_cluster_count = model.cluster_count;

        let elapsed = self.elapsed_secs();
        let max_callouts = self.engine.config().max_callouts;
        if let Some(export) = self.export.as_mut() {
            export.add_frame(SimFrame::from_model(elapsed, &model, max_callouts));
        }
        debug!(
            "  render: {} observations, {} clusters, {} stale",
            model.observation_count, model.cluster_count, model.stale_count
        );
        Some(model)
    }

    fn advance(&self, duration: Duration) {
        self.ctx.advance(duration);
    }

    fn elapsed_secs(&self) -> f64 {
        (self.ctx.now() - self.start).num_milliseconds() as f64 / 1000.0
    }

    fn count(&self) -> usize {
        self.engine.observation_count(SIM_CHANNEL)
    }
}

/// Fails the scenario with a message unless `condition` holds.
fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

/// Scenario runner for aggregation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Engine configuration for every run
    config: SitmapConfig,

    /// Local origin of the simulated area
    origin: Coordinate,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SitmapConfig::default(),
            origin: Coordinate {
                lat: 60.17,
                lon: 24.94,
            },
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: SitmapConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario, capturing every render as a frame.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, Some(SimExport::new(scenario.name(), self.seed)));
        let mut export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(
        &self,
        scenario: ScenarioId,
        export: Option<SimExport>,
    ) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let config = match scenario {
            ScenarioId::CapacityFlood => SitmapConfig {
                capacity: 50,
                ..self.config.clone()
            },
            _ => self.config.clone(),
        };

        let mut session = match self.session(config, export) {
            Ok(session) => session,
            Err(reason) => {
                return (
                    ScenarioResult {
                        scenario,
                        seed: self.seed,
                        passed: false,
                        final_time_secs: 0.0,
                        final_observation_count: 0,
                        failure_reason: Some(reason),
                        metrics: ScenarioMetrics::default(),
                    },
                    None,
                )
            }
        };

        let outcome = match scenario {
            ScenarioId::Redelivery => run_redelivery(&mut session),
            ScenarioId::ConvergingObservers => run_converging_observers(&mut session),
            ScenarioId::CapacityFlood => run_capacity_flood(&mut session),
            ScenarioId::FirstDiff => run_first_diff(&mut session),
            ScenarioId::DriftAndStale => run_drift_and_stale(&mut session),
            ScenarioId::FocusFilter => run_focus_filter(&mut session),
            ScenarioId::WindowExpiry => run_window_expiry(&mut session),
            ScenarioId::TextLocated => run_text_located(&mut session),
        };

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.is_ok(),
            final_time_secs: session.elapsed_secs(),
            final_observation_count: session.count(),
            failure_reason: outcome.err(),
            metrics: session.metrics.clone(),
        };
        (result, session.export)
    }

    fn session(&self, config: SitmapConfig, export: Option<SimExport>) -> Result<Session, String> {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let start = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .ok_or_else(|| "invalid start instant".to_string())?;

        let ctx = ManualContext::shared(start);
        let engine = SitmapEngine::new(Arc::clone(&ctx), config).map_err(|e| e.to_string())?;

        Ok(Session {
            ctx,
            engine,
            oracle: Oracle::new(physics_seed, self.origin),
            start,
            metrics: ScenarioMetrics::default(),
            export,
        })
    }
}

/// SIM-001: every report re-delivered 2-5 times never duplicates.
fn run_redelivery(s: &mut Session) -> Result<(), String> {
    info!("SIM-001: Redelivery - idempotent ingest");

    for i in 0..5 {
        s.oracle
            .spawn_event(i as f64 * 2000.0, 0.0, &["enemy"], "BTR", Some(1.0), s.start);
    }

    let ids: Vec<u64> = s.oracle.events().map(|e| e.id).collect();
    for id in ids {
        let copies = s.oracle.random_range(2, 5);
        for _ in 0..copies {
            if let Some(report) = s.oracle.generate_report(SIM_CHANNEL, id, 0, ChronoDuration::zero()) {
                s.ingest(report);
            }
        }
    }

    ensure(s.count() == 5, || format!("expected 5 observations, got {}", s.count()))?;
    for obs in s.engine.list_by_channel(SIM_CHANNEL) {
        ensure(obs.sources.len() == 1, || {
            format!("observation {} has {} sources", obs.id, obs.sources.len())
        })?;
    }

    let model = s.render(RenderOptions::default()).ok_or("empty render")?;
    ensure(model.cluster_count == 5, || {
        format!("expected 5 clusters, got {}", model.cluster_count)
    })?;

    info!("✓ Redelivery complete: {} reports → {} observations", s.metrics.reports_ingested, s.count());
    Ok(())
}

/// SIM-002: three observers per event fuse into one observation each.
fn run_converging_observers(s: &mut Session) -> Result<(), String> {
    info!("SIM-002: ConvergingObservers - fuzzy merge");

    s.oracle.set_position_noise(15.0);
    let kinds: [(&[&str], &str); 4] = [
        (&["enemy"], "infantry squad"),
        (&["logistics"], "fuel trucks"),
        (&["friendly"], "allied patrol"),
        (&["enemy", "armor"], "tank platoon"),
    ];
    for (i, (tags, what)) in kinds.iter().enumerate() {
        s.oracle
            .spawn_event(i as f64 * 3000.0, 0.0, tags, what, None, s.start);
    }

    let ids: Vec<u64> = s.oracle.events().map(|e| e.id).collect();
    for observer in 0..3 {
        for &id in &ids {
            let delay = ChronoDuration::minutes(s.oracle.random_range(0, 10) as i64);
            if let Some(report) = s.oracle.generate_report(SIM_CHANNEL, id, observer, delay) {
                s.ingest(report);
            }
        }
    }

    ensure(s.count() == 4, || format!("expected 4 observations, got {}", s.count()))?;
    for obs in s.engine.list_by_channel(SIM_CHANNEL) {
        ensure(obs.sources.len() == 3, || {
            format!("observation {} fused {} sources, expected 3", obs.id, obs.sources.len())
        })?;
    }

    // Fused positions stay close to the truth
    for (id, truth) in s.oracle.ground_truth_positions() {
        let source = source_id(0, id);
        let obs = s
            .engine
            .list_by_channel(SIM_CHANNEL)
            .into_iter()
            .find(|o| o.sources.contains(&source))
            .ok_or_else(|| format!("no observation for event {}", id))?;
        let error = obs.position.distance_m(&truth);
        ensure(error < 60.0, || format!("event {} fused {:.1}m from truth", id, error))?;
    }

    s.render(RenderOptions::default()).ok_or("empty render")?;
    info!("✓ ConvergingObservers complete: 12 reports → {} observations", s.count());
    Ok(())
}

/// SIM-003: the oldest observations are evicted first.
fn run_capacity_flood(s: &mut Session) -> Result<(), String> {
    info!("SIM-003: CapacityFlood - bounded store");

    let capacity = s.engine.config().capacity;
    let total = capacity + 30;
    for i in 0..total {
        let east = (i % 10) as f64 * 1000.0;
        let north = (i / 10) as f64 * 1000.0;
        let at = s.start + ChronoDuration::seconds(i as i64);
        s.oracle.spawn_event(east, north, &["logistics"], "supply cache", None, at);
    }

    s.report_all(0);
    ensure(s.count() == capacity, || {
        format!("expected {} observations, got {}", capacity, s.count())
    })?;

    let remaining: BTreeSet<String> = s
        .engine
        .list_by_channel(SIM_CHANNEL)
        .into_iter()
        .flat_map(|o| o.sources.into_iter())
        .collect();
    let expected: BTreeSet<String> = ((total - capacity) as u64..total as u64)
        .map(|id| source_id(0, id))
        .collect();
    ensure(remaining == expected, || "eviction did not remove the oldest events".to_string())?;

    let model = s.render(RenderOptions::default()).ok_or("empty render")?;
    ensure(model.observation_count == capacity, || {
        format!("render shows {} observations", model.observation_count)
    })?;

    info!("✓ CapacityFlood complete: {} events → {} kept", total, s.count());
    Ok(())
}

/// SIM-004: the first diff render reports everything as new.
fn run_first_diff(s: &mut Session) -> Result<(), String> {
    info!("SIM-004: FirstDiff - no baseline");

    for i in 0..3 {
        s.oracle
            .spawn_event(i as f64 * 2000.0, 0.0, &["enemy"], "BMP", Some(2.0), s.start);
    }
    let ids: BTreeSet<ObservationId> = s.report_all(0).into_iter().map(|o| o.id).collect();

    let model = s.render(RenderOptions::default().with_diff(true)).ok_or("empty render")?;
    let diff = model.diff.ok_or("diff missing")?;
    ensure(diff.new_ids == ids, || format!("expected 3 new, got {}", diff.new_ids.len()))?;
    ensure(diff.moved.is_empty() && diff.stale.is_empty(), || {
        "first diff reported moved or stale entries".to_string()
    })?;

    s.advance(Duration::from_secs(60));
    let model = s.render(RenderOptions::default().with_diff(true)).ok_or("empty render")?;
    let diff = model.diff.ok_or("diff missing")?;
    ensure(diff.is_empty(), || "second diff was not empty".to_string())?;

    info!("✓ FirstDiff complete");
    Ok(())
}

/// SIM-005: drift shows as moved, an out-of-focus event as stale.
fn run_drift_and_stale(s: &mut Session) -> Result<(), String> {
    info!("SIM-005: DriftAndStale - moved and stale");

    s.oracle.set_position_noise(0.0);
    let drifting = s.oracle.spawn_event(0.0, 0.0, &["enemy"], "BTR", None, s.start);
    let hidden = s.oracle.spawn_event(2000.0, 0.0, &["terrain"], "crater", None, s.start);
    s.oracle.spawn_event(4000.0, 0.0, &["enemy"], "mortar", None, s.start);

    let observations = s.report_all(0);
    s.render(RenderOptions::default().with_diff(true)).ok_or("empty render")?;

    // Re-delivered 200 m north: the fused position moves 100 m
    s.advance(Duration::from_secs(300));
    s.oracle.move_event(drifting, 0.0, 200.0);
    let moved = s
        .oracle
        .generate_report(SIM_CHANNEL, drifting, 0, ChronoDuration::minutes(5))
        .and_then(|report| s.ingest(report))
        .ok_or("drift report rejected")?;

    let model = s
        .render(RenderOptions::default().with_diff(true).with_focus(["enemy"]))
        .ok_or("empty render")?;
    let diff = model.diff.ok_or("diff missing")?;

    ensure(diff.new_ids.is_empty(), || format!("{} unexpected new", diff.new_ids.len()))?;
    ensure(diff.moved.len() == 1 && diff.moved.contains_key(&moved.id), || {
        format!("expected 1 moved, got {}", diff.moved.len())
    })?;
    let movement = diff.moved[&moved.id];
    let shift = movement.from.distance_m(&movement.to);
    ensure((shift - 100.0).abs() < 1.0, || format!("moved {:.1}m, expected 100m", shift))?;

    let hidden_source = source_id(0, hidden);
    let hidden_id = observations
        .iter()
        .find(|o| o.sources.contains(&hidden_source))
        .map(|o| o.id)
        .ok_or("hidden event not stored")?;
    ensure(diff.stale.len() == 1 && diff.stale[0].id == hidden_id, || {
        format!("expected the terrain event stale, got {} stale", diff.stale.len())
    })?;

    info!("✓ DriftAndStale complete: moved {:.1}m", shift);
    Ok(())
}

/// SIM-006: focus terms and priority selectors.
fn run_focus_filter(s: &mut Session) -> Result<(), String> {
    info!("SIM-006: FocusFilter - preferences");

    s.oracle.set_position_noise(0.0);
    s.oracle.spawn_event(0.0, 0.0, &["enemy"], "infantry squad", None, s.start);
    s.oracle.spawn_event(2000.0, 0.0, &["logistics"], "fuel depot", None, s.start);
    s.oracle.spawn_event(4000.0, 0.0, &["terrain"], "blown bridge", None, s.start);
    s.oracle.spawn_event(6000.0, 0.0, &["friendly"], "allied patrol", None, s.start);
    s.report_all(0);

    let cases: [(&[&str], usize); 4] = [(&["p2"], 1), (&["p3"], 2), (&["bridge"], 1), (&["p4", "fuel"], 2)];
    for (terms, expected) in cases {
        s.engine.set_focus(SIM_CHANNEL, terms.iter().copied());
        let model = s.render(RenderOptions::default()).ok_or("empty render")?;
        ensure(model.observation_count == expected, || {
            format!("focus {:?}: expected {}, got {}", terms, expected, model.observation_count)
        })?;
    }

    s.engine.set_focus(SIM_CHANNEL, ["no-such-thing"]);
    ensure(s.render(RenderOptions::default()).is_none(), || {
        "unmatched focus still rendered".to_string()
    })?;

    s.engine.clear_focus(SIM_CHANNEL);
    let model = s.render(RenderOptions::default()).ok_or("empty render")?;
    ensure(model.observation_count == 4, || {
        format!("cleared focus shows {}", model.observation_count)
    })?;

    info!("✓ FocusFilter complete");
    Ok(())
}

/// SIM-007: the render window filters, it never deletes.
fn run_window_expiry(s: &mut Session) -> Result<(), String> {
    info!("SIM-007: WindowExpiry - lookback window");

    for i in 0..3 {
        s.oracle
            .spawn_event(i as f64 * 2000.0, 0.0, &["enemy"], "BTR", None, s.start);
    }
    s.report_all(0);
    s.render(RenderOptions::default()).ok_or("empty render")?;

    s.advance(Duration::from_secs(3 * 3600));
    ensure(s.render(RenderOptions::default()).is_none(), || {
        "expired observations still rendered".to_string()
    })?;
    ensure(s.count() == 3, || format!("store lost observations: {}", s.count()))?;

    let model = s
        .render(RenderOptions::default().with_lookback(240))
        .ok_or("wider window was empty")?;
    ensure(model.observation_count == 3, || {
        format!("wider window shows {}", model.observation_count)
    })?;

    info!("✓ WindowExpiry complete");
    Ok(())
}

/// SIM-008: decimal degrees in text resolve, bare tokens are rejected.
fn run_text_located(s: &mut Session) -> Result<(), String> {
    info!("SIM-008: TextLocated - coordinate resolution");

    for i in 0..4 {
        s.oracle
            .spawn_event(i as f64 * 2000.0, 0.0, &["enemy"], "BTR", None, s.start);
    }

    let events: Vec<(u64, Coordinate)> = s.oracle.ground_truth_positions();
    for (id, truth) in &events {
        let report = ObservationReport::new(SIM_CHANNEL, source_id(1, *id), s.start)
            .with_text(format!("BTR at {:.6}, {:.6} moving west", truth.lat, truth.lon))
            .with_tags(["enemy"]);
        s.ingest(report);
    }
    for i in 0..2 {
        let report = ObservationReport::new(SIM_CHANNEL, format!("grid-{}", i), s.start)
            .with_location_token("35VLG 8472 7186")
            .with_text("contact at grid");
        s.ingest(report);
    }

    ensure(s.count() == 4, || format!("expected 4 located observations, got {}", s.count()))?;
    ensure(s.metrics.reports_rejected == 2, || {
        format!("expected 2 rejected, got {}", s.metrics.reports_rejected)
    })?;

    for obs in s.engine.list_by_channel(SIM_CHANNEL) {
        let nearest = events
            .iter()
            .map(|(_, truth)| obs.position.distance_m(truth))
            .fold(f64::INFINITY, f64::min);
        ensure(nearest < 1.0, || format!("text position off by {:.1}m", nearest))?;
    }

    info!("✓ TextLocated complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_scenarios_pass_across_seeds() {
        for seed in [1, 7, 1234, 99_999] {
            let runner = ScenarioRunner::new(seed);
            for scenario in [ScenarioId::Redelivery, ScenarioId::ConvergingObservers] {
                let result = runner.run(scenario);
                assert!(result.passed, "{} seed={} failed: {:?}", scenario, seed, result.failure_reason);
            }
        }
    }

    #[test]
    fn test_export_captures_renders() {
        let runner = ScenarioRunner::new(42);
        let (result, export) = runner.run_with_export(ScenarioId::FirstDiff);

        assert!(result.passed);
        assert!(export.passed);
        assert_eq!(export.frames.len(), 2);
        assert_eq!(export.frames[0].diff.unwrap().new, 3);
        assert!(export.frames[0].caption.starts_with("Observations: 3"));
    }

    #[test]
    fn test_invalid_config_fails_cleanly() {
        let runner = ScenarioRunner::new(42).with_config(SitmapConfig {
            cluster_threshold_m: 0.0,
            ..Default::default()
        });
        let result = runner.run(ScenarioId::FirstDiff);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("cluster_threshold_m"));
    }
}
