//! The "DIFF" Engine - new / moved / stale against the last rendered state
//!
//! Each channel is either without a baseline or holds exactly one. A
//! baseline is a lightweight projection of the observations shown by the
//! last render that opted to update it, and it is only ever replaced
//! wholesale.

use crate::config::SitmapConfig;
use crate::sitmap_geo::Coordinate;
use crate::sitmap_store::{Observation, ObservationId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sitmap_env::ChannelId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// What a baseline remembers about one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub id: ObservationId,
    pub position: Coordinate,
    pub timestamp: DateTime<Utc>,
    pub priority: u8,
    pub tags: BTreeSet<String>,
}

impl From<&Observation> for SnapshotEntry {
    fn from(obs: &Observation) -> Self {
        Self {
            id: obs.id,
            position: obs.position,
            timestamp: obs.timestamp,
            priority: obs.priority,
            tags: obs.tags.clone(),
        }
    }
}

/// Immutable projection of one channel's last rendered state.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    entries: HashMap<ObservationId, SnapshotEntry>,
}

impl Baseline {
    pub fn from_observations(observations: &[Observation]) -> Self {
        Self {
            entries: observations
                .iter()
                .map(|o| (o.id, SnapshotEntry::from(o)))
                .collect(),
        }
    }

    pub fn get(&self, id: &ObservationId) -> Option<&SnapshotEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Old and new position of a moved observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Movement {
    pub from: Coordinate,
    pub to: Coordinate,
}

/// Three-way classification of the current set relative to a baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub new_ids: BTreeSet<ObservationId>,
    pub moved: BTreeMap<ObservationId, Movement>,
    /// Ordered by (timestamp, id)
    pub stale: Vec<SnapshotEntry>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new_ids.is_empty() && self.moved.is_empty() && self.stale.is_empty()
    }
}

/// Classify `current` against `baseline`.
///
/// - absent from the baseline: new
/// - present and shifted more than `move_threshold_m`: moved
/// - baseline entry absent from `current` with timestamp ≥ `cutoff`: stale
///
/// A missing baseline behaves like an empty one.
pub fn compute_diff(
    baseline: Option<&Baseline>,
    current: &[Observation],
    cutoff: DateTime<Utc>,
    move_threshold_m: f64,
) -> DiffResult {
    let mut diff = DiffResult::default();

    for obs in current {
        match baseline.and_then(|b| b.get(&obs.id)) {
            None => {
                diff.new_ids.insert(obs.id);
            }
            Some(prev) => {
                if prev.position.distance_m(&obs.position) > move_threshold_m {
                    diff.moved.insert(
                        obs.id,
                        Movement {
                            from: prev.position,
                            to: obs.position,
                        },
                    );
                }
            }
        }
    }

    if let Some(baseline) = baseline {
        let current_ids: BTreeSet<ObservationId> = current.iter().map(|o| o.id).collect();
        diff.stale = baseline
            .entries
            .values()
            .filter(|e| !current_ids.contains(&e.id) && e.timestamp >= cutoff)
            .cloned()
            .collect();
        diff.stale
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    }

    diff
}

/// Per-channel baselines.
///
/// Every replacement bumps the channel's generation, letting a render that
/// read the baseline earlier detect that a newer one landed in between.
#[derive(Debug, Clone)]
pub struct SnapshotDiffEngine {
    move_threshold_m: f64,
    baselines: HashMap<ChannelId, Arc<Baseline>>,
    generations: HashMap<ChannelId, u64>,
}

impl SnapshotDiffEngine {
    pub fn new(config: &SitmapConfig) -> Self {
        Self {
            move_threshold_m: config.move_threshold_m(),
            baselines: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    /// Number of baseline replacements seen by a channel.
    pub fn generation(&self, channel: ChannelId) -> u64 {
        self.generations.get(&channel).copied().unwrap_or(0)
    }

    pub fn move_threshold_m(&self) -> f64 {
        self.move_threshold_m
    }

    pub fn has_baseline(&self, channel: ChannelId) -> bool {
        self.baselines.contains_key(&channel)
    }

    /// Shared handle to the channel's baseline, cheap to take under a lock.
    pub fn baseline(&self, channel: ChannelId) -> Option<Arc<Baseline>> {
        self.baselines.get(&channel).cloned()
    }

    pub fn compute(
        &self,
        channel: ChannelId,
        current: &[Observation],
        cutoff: DateTime<Utc>,
    ) -> DiffResult {
        compute_diff(
            self.baselines.get(&channel).map(Arc::as_ref),
            current,
            cutoff,
            self.move_threshold_m,
        )
    }

    /// Replace the channel's baseline with a projection of `current`.
    pub fn replace_baseline(&mut self, channel: ChannelId, current: &[Observation]) {
        self.baselines
            .insert(channel, Arc::new(Baseline::from_observations(current)));
        *self.generations.entry(channel).or_insert(0) += 1;
    }

    /// Replace the baseline only if it is still at `expected` generation.
    ///
    /// Returns false, leaving the newer baseline in place, when another
    /// replacement happened after `expected` was read.
    pub fn replace_baseline_if(
        &mut self,
        channel: ChannelId,
        expected: u64,
        current: &[Observation],
    ) -> bool {
        if self.generation(channel) != expected {
            return false;
        }
        self.replace_baseline(channel, current);
        true
    }
}
