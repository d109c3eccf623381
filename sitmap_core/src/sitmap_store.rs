//! The "STORE" Engine - bounded per-channel observation state
//!
//! Each channel owns:
//! - the observations themselves, keyed by an immutable `ObservationId`
//! - a source-id index guaranteeing at most one observation per source-id
//! - an H3 spatial index used to prune merge candidate scans
//!
//! Capacity is enforced after every insert by evicting the chronologically
//! oldest observations together with their source-id registrations.

use crate::config::SitmapConfig;
use crate::sitmap_geo::{
    grid_disk_size, rings_for_radius, Coordinate, GeoError, SpatialIndex, SpatialIndexStats,
};
use crate::sitmap_merge::{MergeDecision, MergeEngine, NormalizedReport};
use chrono::{DateTime, Utc};
use h3o::{CellIndex, Resolution};
use serde::{Deserialize, Serialize};
use sitmap_env::ChannelId;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Immutable identifier of a fused observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationId(pub Uuid);

impl ObservationId {
    /// Creates a new random ObservationId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ============================================================================
// INGEST REQUEST (Input)
// ============================================================================

/// A single field report as handed over by the ingester.
///
/// Location is given either as direct `lat`/`lon`, as a `location_token` for
/// the coordinate resolver, or embedded in `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationReport {
    pub channel: ChannelId,

    /// Opaque ingester id used for idempotent re-delivery
    pub source_id: String,

    /// When the event was observed
    pub observed_at: DateTime<Utc>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,

    /// Grid reference or place token for the resolver
    pub location_token: Option<String>,

    /// Free-text description
    pub text: String,

    /// Structured "what" extracted upstream
    pub what: Option<String>,
    pub amount: Option<f64>,

    pub unit: Option<String>,
    pub observer: Option<String>,
    pub tags: Vec<String>,

    /// Confidence in [0, 100]
    pub confidence: Option<f64>,

    /// Accuracy radius in meters
    pub accuracy_m: Option<f64>,
}

impl ObservationReport {
    pub fn new(channel: ChannelId, source_id: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            channel,
            source_id: source_id.into(),
            observed_at,
            lat: None,
            lon: None,
            location_token: None,
            text: String::new(),
            what: None,
            amount: None,
            unit: None,
            observer: None,
            tags: Vec::new(),
            confidence: None,
            accuracy_m: None,
        }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_location_token(mut self, token: impl Into<String>) -> Self {
        self.location_token = Some(token.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_what(mut self, what: impl Into<String>, amount: Option<f64>) -> Self {
        self.what = Some(what.into());
        self.amount = amount;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_observer(mut self, observer: impl Into<String>) -> Self {
        self.observer = Some(observer.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

// ============================================================================
// OBSERVATION (Internal State)
// ============================================================================

/// A fused record of one real-world event at a location and time.
///
/// Created by the first unmatched report and mutated in place by every
/// later report merged into it; the id never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub channel: ChannelId,
    pub position: Coordinate,

    /// Latest event time of any contributing report
    pub timestamp: DateTime<Utc>,

    pub text: String,
    pub what: Option<String>,
    pub amount: Option<f64>,
    pub unit: Option<String>,
    pub observer: Option<String>,
    pub tags: BTreeSet<String>,

    /// 1 = highest … 4 = lowest
    pub priority: u8,

    /// [0, 100]
    pub confidence: f64,

    pub accuracy_m: Option<f64>,

    /// How the location was derived ("latlon" or the resolved token)
    pub origin_format: String,

    /// Every source-id that contributed
    pub sources: BTreeSet<String>,

    pub last_updated: DateTime<Utc>,
}

impl Observation {
    /// Create a new observation from a normalized report.
    pub fn from_report(id: ObservationId, report: &NormalizedReport, now: DateTime<Utc>) -> Self {
        Self {
            id,
            channel: report.channel,
            position: report.position,
            timestamp: report.observed_at,
            text: report.text.clone(),
            what: report.what.clone().or_else(|| Some(report.text.clone())),
            amount: report.amount,
            unit: report.unit.clone(),
            observer: report.observer.clone(),
            tags: report.tags.clone(),
            priority: report.priority,
            confidence: report.confidence,
            accuracy_m: report.accuracy_m,
            origin_format: report.origin_format.clone(),
            sources: BTreeSet::from([report.source_id.clone()]),
            last_updated: now,
        }
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.position.lat
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.position.lon
    }
}

// ============================================================================
// CHANNEL STORE
// ============================================================================

/// All state for one channel.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    observations: HashMap<ObservationId, Observation>,

    /// source-id → observation-id
    source_index: HashMap<String, ObservationId>,

    /// H3 cell → observation-ids
    spatial_index: SpatialIndex<ObservationId>,

    /// Current cell of every observation
    cells: HashMap<ObservationId, CellIndex>,
}

impl ChannelStore {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            observations: HashMap::new(),
            source_index: HashMap::new(),
            spatial_index: SpatialIndex::new(resolution),
            cells: HashMap::new(),
        }
    }

    pub fn get(&self, id: &ObservationId) -> Option<&Observation> {
        self.observations.get(id)
    }

    /// Observation registered for a source-id.
    pub fn source_target(&self, source_id: &str) -> Option<ObservationId> {
        self.source_index.get(source_id).copied()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.source_index.len()
    }

    /// Ids that may lie within `radius_m` of `position`.
    ///
    /// Falls back to every id in the channel once the k-ring disk would
    /// visit more cells than the channel holds observations.
    pub fn nearby(&self, position: Coordinate, radius_m: f64) -> HashSet<ObservationId> {
        let resolution = self.spatial_index.resolution();
        let rings = rings_for_radius(resolution, radius_m);
        if grid_disk_size(rings) > self.observations.len() as u64 {
            return self.observations.keys().copied().collect();
        }
        match position.to_cell(resolution) {
            Ok(cell) => self.spatial_index.query_kring(cell, rings),
            Err(_) => self.observations.keys().copied().collect(),
        }
    }

    /// Snapshot copy ordered by (timestamp, id).
    pub fn snapshot(&self) -> Vec<Observation> {
        let mut list: Vec<Observation> = self.observations.values().cloned().collect();
        list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        list
    }

    pub fn spatial_stats(&self) -> SpatialIndexStats {
        self.spatial_index.stats()
    }

    fn insert(&mut self, obs: Observation) -> Result<(), GeoError> {
        let cell = obs.position.to_cell(self.spatial_index.resolution())?;
        for source in &obs.sources {
            self.source_index.insert(source.clone(), obs.id);
        }
        self.spatial_index.insert(cell, obs.id);
        self.cells.insert(obs.id, cell);
        self.observations.insert(obs.id, obs);
        Ok(())
    }

    /// Fuse a report into an existing observation and re-key its cell.
    fn fuse(
        &mut self,
        id: ObservationId,
        report: &NormalizedReport,
        now: DateTime<Utc>,
    ) -> Result<Observation, GeoError> {
        let Some(obs) = self.observations.get_mut(&id) else {
            panic!(
                "source index or merge candidate references missing observation {} (source {})",
                id, report.source_id
            );
        };

        MergeEngine::fuse(obs, report, now);
        let new_cell = obs.position.to_cell(self.spatial_index.resolution())?;
        let snapshot = obs.clone();

        self.source_index.insert(report.source_id.clone(), id);
        if let Some(old_cell) = self.cells.insert(id, new_cell) {
            self.spatial_index.reindex(id, old_cell, new_cell);
        } else {
            self.spatial_index.insert(new_cell, id);
        }
        Ok(snapshot)
    }

    /// Remove an observation with all its index entries.
    fn remove(&mut self, id: &ObservationId) -> Option<Observation> {
        let obs = self.observations.remove(id)?;
        for source in &obs.sources {
            if self.source_index.get(source) == Some(id) {
                self.source_index.remove(source);
            }
        }
        if let Some(cell) = self.cells.remove(id) {
            self.spatial_index.remove(cell, *id);
        }
        Some(obs)
    }

    /// Evict oldest-by-(timestamp, id) until at or under capacity.
    fn evict_overflow(&mut self, capacity: usize) -> Vec<ObservationId> {
        if self.observations.len() <= capacity {
            return Vec::new();
        }
        let excess = self.observations.len() - capacity;

        let mut order: Vec<(DateTime<Utc>, ObservationId)> = self
            .observations
            .values()
            .map(|o| (o.timestamp, o.id))
            .collect();
        order.sort_unstable();

        order
            .into_iter()
            .take(excess)
            .filter_map(|(_, id)| self.remove(&id).map(|o| o.id))
            .collect()
    }
}

// ============================================================================
// OBSERVATION STORE
// ============================================================================

/// How an upsert was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    /// Re-delivery of a registered source-id
    Updated,
    /// Fuzzy match with another source's observation
    Merged,
    /// No match: a new observation
    Created,
}

/// Result of a successful upsert.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub observation: Observation,
    pub kind: UpsertKind,
    pub evicted: Vec<ObservationId>,
}

/// Per-channel observation maps with idempotent dedup and bounded capacity.
///
/// Not internally synchronized: the engine serializes access.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    channels: HashMap<ChannelId, ChannelStore>,
    merge: MergeEngine,
    capacity: usize,
    resolution: Resolution,
}

impl ObservationStore {
    pub fn new(config: &SitmapConfig) -> Self {
        Self {
            channels: HashMap::new(),
            merge: MergeEngine::new(config),
            capacity: config.capacity,
            resolution: config.resolution(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply a report: update by source-id, merge into a candidate, or
    /// create; then enforce capacity.
    pub fn upsert(
        &mut self,
        report: NormalizedReport,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, GeoError> {
        let resolution = self.resolution;
        let channel = self
            .channels
            .entry(report.channel)
            .or_insert_with(|| ChannelStore::new(resolution));

        let (observation, kind) = match self.merge.decide(channel, &report) {
            MergeDecision::SourceMatch(id) => (channel.fuse(id, &report, now)?, UpsertKind::Updated),
            MergeDecision::Candidate(id) => {
                debug!(
                    channel = %report.channel,
                    source = %report.source_id,
                    observation = %id,
                    "Merged report into nearby observation"
                );
                (channel.fuse(id, &report, now)?, UpsertKind::Merged)
            }
            MergeDecision::Create => {
                let obs = Observation::from_report(ObservationId::new(), &report, now);
                channel.insert(obs.clone())?;
                (obs, UpsertKind::Created)
            }
        };

        let evicted = channel.evict_overflow(self.capacity);
        debug_assert!(channel.len() <= self.capacity);

        Ok(UpsertOutcome {
            observation,
            kind,
            evicted,
        })
    }

    /// Snapshot copy of a channel's observations, ordered by (timestamp, id).
    pub fn list_by_channel(&self, channel: ChannelId) -> Vec<Observation> {
        self.channels
            .get(&channel)
            .map(ChannelStore::snapshot)
            .unwrap_or_default()
    }

    pub fn channel(&self, channel: ChannelId) -> Option<&ChannelStore> {
        self.channels.get(&channel)
    }

    pub fn count(&self, channel: ChannelId) -> usize {
        self.channels.get(&channel).map(ChannelStore::len).unwrap_or(0)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn spatial_stats(&self, channel: ChannelId) -> SpatialIndexStats {
        self.channels
            .get(&channel)
            .map(ChannelStore::spatial_stats)
            .unwrap_or_default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
