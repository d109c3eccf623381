//! Sitmap Engine - orchestrates the store, diff and live engines with an
//! environment context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SitmapEngine                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              Context: SitmapContext                    │  │
//! │  │  • now() → lookback cutoffs, last_updated stamps       │  │
//! │  │  • sleep()/spawn() → live update jobs                  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                              │                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌────────┐ ┌────────┐   │
//! │  │  STORE  │ │  MERGE  │ │ CLUSTER │ │  DIFF  │ │  LIVE  │   │
//! │  └─────────┘ └─────────┘ └─────────┘ └────────┘ └────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ingest: resolve location → normalize → `ObservationStore::upsert`.
//! Render: snapshot under the lock → window + focus filter → cluster →
//! diff → optional baseline replacement.
//!
//! # Usage
//!
//! ```ignore
//! use sitmap_core::{ObservationReport, RenderOptions, SitmapConfig, SitmapEngine};
//! use sitmap_env::{ChannelId, TokioContext};
//!
//! let engine = SitmapEngine::new(TokioContext::shared(), SitmapConfig::default())?;
//! engine.upsert(
//!     ObservationReport::new(ChannelId(1), "msg-17", chrono::Utc::now())
//!         .at(60.1699, 24.9384)
//!         .with_tags(["enemy"]),
//! );
//! let model = engine.render_model(ChannelId(1), RenderOptions::default().with_diff(true));
//! ```

use crate::config::{ConfigError, SitmapConfig};
use crate::resolver::{CoordinateResolver, DecimalDegreesResolver};
use crate::sitmap_cluster::cluster_observations;
use crate::sitmap_diff::{compute_diff, SnapshotDiffEngine};
use crate::sitmap_filter::{matches, normalize_terms, ChannelPreferences};
use crate::sitmap_geo::SpatialIndexStats;
use crate::sitmap_live::{LiveJobHandle, LiveUpdateScheduler, LiveUpdateSink};
use crate::sitmap_merge::NormalizedReport;
use crate::sitmap_render::{build_callout, build_caption, RenderModel, RenderOptions, LATLON_ORIGIN};
use crate::sitmap_store::{Observation, ObservationReport, ObservationStore, UpsertKind};
use sitmap_env::{ChannelId, SitmapContext};

use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

type LiveTickFuture = Pin<Box<dyn Future<Output = ControlFlow<()>> + Send>>;

/// State mutated under the single store-wide lock.
struct EngineState {
    store: ObservationStore,
    diff: SnapshotDiffEngine,
}

/// The aggregation engine for one process.
///
/// Generic over the context so the same engine runs against the system
/// clock in production and a virtual clock in tests and simulation.
pub struct SitmapEngine<Ctx: SitmapContext> {
    context: Arc<Ctx>,
    config: SitmapConfig,
    resolver: Arc<dyn CoordinateResolver>,

    /// Observations, source index and baselines
    state: Mutex<EngineState>,

    preferences: Mutex<HashMap<ChannelId, ChannelPreferences>>,

    live: LiveUpdateScheduler<Ctx>,
}

impl<Ctx: SitmapContext> SitmapEngine<Ctx> {
    /// Creates an engine with the `DecimalDegreesResolver`.
    pub fn new(context: Arc<Ctx>, config: SitmapConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            state: Mutex::new(EngineState {
                store: ObservationStore::new(&config),
                diff: SnapshotDiffEngine::new(&config),
            }),
            preferences: Mutex::new(HashMap::new()),
            live: LiveUpdateScheduler::new(Arc::clone(&context)),
            resolver: Arc::new(DecimalDegreesResolver),
            context,
            config,
        })
    }

    /// Replaces the coordinate resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn CoordinateResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &SitmapConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_preferences(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelPreferences>> {
        self.preferences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Ingest a report. Returns a copy of the resulting observation, or
    /// `None` when the report's location cannot be resolved.
    pub fn upsert(&self, report: ObservationReport) -> Option<Observation> {
        let channel = report.channel;
        let source = report.source_id.clone();

        let Some((lat, lon, origin)) = self.resolve_location(&report) else {
            debug!(channel = %channel, source = %source, "Rejected report without resolvable location");
            return None;
        };

        let normalized =
            match NormalizedReport::new(report, lat, lon, origin, self.config.default_confidence) {
                Ok(normalized) => normalized,
                Err(e) => {
                    debug!(channel = %channel, source = %source, error = %e, "Rejected report");
                    return None;
                }
            };

        let now = self.context.now();
        let outcome = self.lock_state().store.upsert(normalized, now);

        match outcome {
            Ok(outcome) => {
                if !outcome.evicted.is_empty() {
                    warn!(
                        channel = %channel,
                        evicted = outcome.evicted.len(),
                        capacity = self.config.capacity,
                        "Evicted oldest observations"
                    );
                }
                if outcome.kind == UpsertKind::Created {
                    debug!(channel = %channel, source = %source, observation = %outcome.observation.id, "Created observation");
                }
                Some(outcome.observation)
            }
            Err(e) => {
                debug!(channel = %channel, source = %source, error = %e, "Rejected report");
                None
            }
        }
    }

    /// Direct coordinates, else one resolver call on the location token,
    /// else one resolver call on the free text.
    fn resolve_location(&self, report: &ObservationReport) -> Option<(f64, f64, String)> {
        if let (Some(lat), Some(lon)) = (report.lat, report.lon) {
            return Some((lat, lon, LATLON_ORIGIN.to_string()));
        }

        let token = report
            .location_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let (query, origin) = match token {
            Some(token) => (token, token.to_string()),
            None => (report.text.as_str(), LATLON_ORIGIN.to_string()),
        };

        let position = self.resolver.resolve(query)?;
        Some((position.lat, position.lon, origin))
    }

    /// Snapshot copy of a channel's observations, ordered by (timestamp, id).
    pub fn list_by_channel(&self, channel: ChannelId) -> Vec<Observation> {
        self.lock_state().store.list_by_channel(channel)
    }

    // ------------------------------------------------------------------
    // Render
    // ------------------------------------------------------------------

    /// Build the render model for a channel.
    ///
    /// Returns `None` when nothing passes the window and focus filter and,
    /// if diffing, no stale entries exist either. In that case the baseline
    /// is left untouched.
    pub fn render_model(&self, channel: ChannelId, options: RenderOptions) -> Option<RenderModel> {
        let now = self.context.now();
        let lookback = options
            .lookback_minutes
            .filter(|m| *m > 0)
            .unwrap_or(self.config.lookback_minutes);
        let cutoff = now - chrono::Duration::minutes(i64::from(lookback));

        let focus_terms = match options.focus_terms {
            Some(terms) => normalize_terms(terms),
            None => self.get_preferences(channel).focus_terms,
        };

        let (observations, baseline, generation, move_threshold_m) = {
            let state = self.lock_state();
            (
                state.store.list_by_channel(channel),
                state.diff.baseline(channel),
                state.diff.generation(channel),
                state.diff.move_threshold_m(),
            )
        };

        let current: Vec<Observation> = observations
            .into_iter()
            .filter(|o| o.timestamp >= cutoff && matches(o, &focus_terms))
            .collect();

        let diff = options
            .diff
            .then(|| compute_diff(baseline.as_deref(), &current, cutoff, move_threshold_m));
        let stale_count = diff.as_ref().map_or(0, |d| d.stale.len());

        if current.is_empty() && stale_count == 0 {
            return None;
        }

        let clusters = cluster_observations(&current, self.config.cluster_threshold_m);
        let callouts = clusters
            .iter()
            .enumerate()
            .map(|(i, c)| build_callout(i + 1, c, self.config.callout_text_limit))
            .collect();

        if options.update_baseline
            && !self
                .lock_state()
                .diff
                .replace_baseline_if(channel, generation, &current)
        {
            debug!(channel = %channel, "Baseline replaced by a concurrent render, keeping it");
        }

        Some(RenderModel {
            channel,
            generated_at: now,
            focus_terms,
            observation_count: current.len(),
            cluster_count: clusters.len(),
            stale_count,
            clusters,
            diff,
            callouts,
        })
    }

    /// Text summary of a model, truncated to the configured callout count.
    pub fn build_caption(&self, model: &RenderModel) -> String {
        build_caption(model, self.config.max_callouts)
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub fn set_focus<I, S>(&self, channel: ChannelId, terms: I) -> ChannelPreferences
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefs = self.lock_preferences();
        let entry = prefs.entry(channel).or_default();
        entry.set_focus(terms);
        entry.clone()
    }

    pub fn clear_focus(&self, channel: ChannelId) -> ChannelPreferences {
        let mut prefs = self.lock_preferences();
        let entry = prefs.entry(channel).or_default();
        entry.clear_focus();
        entry.clone()
    }

    pub fn get_preferences(&self, channel: ChannelId) -> ChannelPreferences {
        self.lock_preferences().entry(channel).or_default().clone()
    }

    // ------------------------------------------------------------------
    // Live updates
    // ------------------------------------------------------------------

    /// Start periodic diff renders for a channel, delivered to `sink`.
    ///
    /// Returns `false` if a job is already active for the channel. Must be
    /// called from within a tokio runtime.
    pub fn start_live(
        self: &Arc<Self>,
        channel: ChannelId,
        interval: Option<Duration>,
        sink: Arc<dyn LiveUpdateSink>,
    ) -> bool {
        let interval = self.effective_interval(channel, interval);
        self.live.start(channel, interval, self.live_tick(channel, sink))
    }

    /// Replace any active job for the channel with a new one.
    pub fn restart_live(
        self: &Arc<Self>,
        channel: ChannelId,
        interval: Option<Duration>,
        sink: Arc<dyn LiveUpdateSink>,
    ) {
        let interval = self.effective_interval(channel, interval);
        self.live.restart(channel, interval, self.live_tick(channel, sink));
    }

    pub fn stop_live(&self, channel: ChannelId) -> bool {
        self.live.stop(channel)
    }

    pub fn is_live(&self, channel: ChannelId) -> bool {
        self.live.is_active(channel)
    }

    pub fn live_job(&self, channel: ChannelId) -> Option<LiveJobHandle> {
        self.live.handle(channel)
    }

    pub fn live_channels(&self) -> Vec<ChannelId> {
        self.live.active_channels()
    }

    /// Stop every live job. Returns how many were stopped.
    pub fn shutdown(&self) -> usize {
        self.live.stop_all()
    }

    fn effective_interval(&self, channel: ChannelId, requested: Option<Duration>) -> Duration {
        let interval = self.config.live_interval(requested);
        if let Some(requested) = requested {
            if requested < interval {
                warn!(
                    channel = %channel,
                    requested_secs = requested.as_secs(),
                    interval_secs = interval.as_secs(),
                    "Live interval clamped to minimum"
                );
            }
        }
        interval
    }

    /// One live tick: render with diff and deliver if there is something
    /// to show. Ends the job once the engine has been dropped.
    fn live_tick(
        self: &Arc<Self>,
        channel: ChannelId,
        sink: Arc<dyn LiveUpdateSink>,
    ) -> impl FnMut() -> LiveTickFuture + Send + 'static {
        let engine: Weak<Self> = Arc::downgrade(self);
        move || {
            let engine = engine.clone();
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                let model = match engine.upgrade() {
                    Some(engine) => engine.render_model(channel, RenderOptions::live()),
                    None => return ControlFlow::Break(()),
                };
                if let Some(model) = model {
                    sink.deliver(channel, model).await;
                }
                ControlFlow::Continue(())
            })
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn observation_count(&self, channel: ChannelId) -> usize {
        self.lock_state().store.count(channel)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.lock_state().store.channels()
    }

    pub fn spatial_stats(&self, channel: ChannelId) -> SpatialIndexStats {
        self.lock_state().store.spatial_stats(channel)
    }
}
