//! The "MERGE" Engine - fuzzy identity for independent reports
//!
//! Independent observers of one event rarely share an identifier. A report
//! is attached to an existing observation when:
//! 1. its source-id is already registered (idempotent re-delivery), or
//! 2. an observation shares a tag, lies within the lookback window and
//!    within half the clustering threshold (fuzzy match).
//!
//! Otherwise a new observation is created. Both update paths use the same
//! fusion rule (`MergeEngine::fuse`).

use crate::config::SitmapConfig;
use crate::sitmap_geo::{Coordinate, GeoError};
use crate::sitmap_store::{ChannelStore, Observation, ObservationId, ObservationReport};
use chrono::{DateTime, Utc};
use sitmap_env::ChannelId;
use std::collections::BTreeSet;

// ============================================================================
// PRIORITY TABLE
// ============================================================================

/// Tag assigned to reports that arrive without any tag.
pub const UNCLASSIFIED_TAG: &str = "unclassified";

/// Priority used when no rule matches.
pub const DEFAULT_PRIORITY: u8 = 4;

/// One row of the tag → priority table.
#[derive(Debug, Clone, Copy)]
pub struct PriorityRule {
    pub tag: &'static str,
    pub priority: u8,
}

/// Consulted top to bottom; the first rule whose tag is present wins.
pub const PRIORITY_RULES: &[PriorityRule] = &[
    PriorityRule { tag: "enemy", priority: 2 },
    PriorityRule { tag: "logistics", priority: 3 },
    PriorityRule { tag: "terrain", priority: 4 },
    PriorityRule { tag: "friendly", priority: 3 },
];

/// Priority (1 = highest, 4 = lowest) for a normalized tag set.
pub fn derive_priority(tags: &BTreeSet<String>) -> u8 {
    PRIORITY_RULES
        .iter()
        .find(|rule| tags.contains(rule.tag))
        .map(|rule| rule.priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// Lower-case and trim tags, dropping empties; empty input becomes
/// `{"unclassified"}`.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    if set.is_empty() {
        BTreeSet::from([UNCLASSIFIED_TAG.to_string()])
    } else {
        set
    }
}

// ============================================================================
// NORMALIZED REPORT
// ============================================================================

/// An ingest request whose location has been resolved and whose fields have
/// been normalized. Only these ever reach the store.
#[derive(Debug, Clone)]
pub struct NormalizedReport {
    pub channel: ChannelId,
    pub source_id: String,
    pub position: Coordinate,
    pub observed_at: DateTime<Utc>,
    pub text: String,
    pub what: Option<String>,
    pub amount: Option<f64>,
    pub unit: Option<String>,
    pub observer: Option<String>,
    pub tags: BTreeSet<String>,
    pub priority: u8,
    pub confidence: f64,
    pub accuracy_m: Option<f64>,
    pub origin_format: String,
}

impl NormalizedReport {
    /// Normalize a report against an already resolved position.
    pub fn new(
        report: ObservationReport,
        lat: f64,
        lon: f64,
        origin_format: String,
        default_confidence: f64,
    ) -> Result<Self, GeoError> {
        let position = Coordinate::new(lat, lon)?;
        let tags = normalize_tags(&report.tags);
        let priority = derive_priority(&tags);
        let confidence = report
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(default_confidence)
            .clamp(0.0, 100.0);

        Ok(Self {
            channel: report.channel,
            source_id: report.source_id,
            position,
            observed_at: report.observed_at,
            text: report.text,
            what: report.what.filter(|w| !w.trim().is_empty()),
            amount: report.amount.filter(|a| a.is_finite()),
            unit: report.unit,
            observer: report.observer,
            tags,
            priority,
            confidence,
            accuracy_m: report.accuracy_m.filter(|a| a.is_finite() && *a > 0.0),
            origin_format,
        })
    }
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

/// Outcome of matching a report against a channel's observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// The report's source-id is already registered to this observation.
    SourceMatch(ObservationId),
    /// A fuzzy match on tags, time and space.
    Candidate(ObservationId),
    /// Nothing matched.
    Create,
}

/// Decides where an incoming report belongs and how it is folded in.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    /// Maximum distance between a report and a merge candidate
    merge_radius_m: f64,

    /// Maximum |timestamp delta| between a report and a merge candidate
    time_window: chrono::Duration,
}

impl MergeEngine {
    pub fn new(config: &SitmapConfig) -> Self {
        Self {
            merge_radius_m: config.merge_radius_m(),
            time_window: config.lookback(),
        }
    }

    pub fn merge_radius_m(&self) -> f64 {
        self.merge_radius_m
    }

    /// Classify a report: source match, fuzzy candidate, or create.
    pub fn decide(&self, channel: &ChannelStore, report: &NormalizedReport) -> MergeDecision {
        if let Some(id) = channel.source_target(&report.source_id) {
            return MergeDecision::SourceMatch(id);
        }
        match self.find_candidate(channel, report) {
            Some(id) => MergeDecision::Candidate(id),
            None => MergeDecision::Create,
        }
    }

    /// Find an observation the report fuzzily matches.
    ///
    /// The spatial index prunes the scan to nearby cells; qualifying
    /// candidates are ordered by id so the choice is deterministic.
    pub fn find_candidate(
        &self,
        channel: &ChannelStore,
        report: &NormalizedReport,
    ) -> Option<ObservationId> {
        let nearby = channel.nearby(report.position, self.merge_radius_m);

        let mut qualifying: Vec<ObservationId> = nearby
            .into_iter()
            .filter(|id| {
                channel
                    .get(id)
                    .map(|obs| self.qualifies(obs, report))
                    .unwrap_or(false)
            })
            .collect();

        qualifying.sort_unstable();
        qualifying.first().copied()
    }

    /// Tag intersection, time window and distance gates.
    pub fn qualifies(&self, obs: &Observation, report: &NormalizedReport) -> bool {
        if obs.tags.is_disjoint(&report.tags) {
            return false;
        }
        let delta = (obs.timestamp - report.observed_at).abs();
        if delta > self.time_window {
            return false;
        }
        obs.position.distance_m(&report.position) <= self.merge_radius_m
    }

    /// Fold a report into an existing observation.
    ///
    /// Position and confidence are averaged, tags and sources unioned, the
    /// timestamp only moves forward and the priority only rises.
    pub fn fuse(obs: &mut Observation, report: &NormalizedReport, now: DateTime<Utc>) {
        obs.position = obs.position.mean_with(&report.position);
        obs.timestamp = obs.timestamp.max(report.observed_at);
        obs.confidence = (obs.confidence + report.confidence) / 2.0;
        obs.priority = obs.priority.min(report.priority);
        obs.tags.extend(report.tags.iter().cloned());
        obs.sources.insert(report.source_id.clone());

        if report.accuracy_m.is_some() {
            obs.accuracy_m = report.accuracy_m;
        }
        obs.text = report.text.clone();
        match &report.what {
            Some(what) => obs.what = Some(what.clone()),
            None if obs.what.is_none() => obs.what = Some(report.text.clone()),
            None => {}
        }
        if report.amount.is_some() {
            obs.amount = report.amount;
        }
        obs.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn report(source: &str, lat: f64, lon: f64, tags: &[&str], conf: f64) -> NormalizedReport {
        let raw = ObservationReport::new(ChannelId(1), source, t0())
            .with_text("contact")
            .with_tags(tags.iter().copied())
            .with_confidence(conf);
        NormalizedReport::new(raw, lat, lon, "latlon".to_string(), 70.0).unwrap()
    }

    #[test]
    fn test_priority_table_precedence() {
        assert_eq!(derive_priority(&normalize_tags(["enemy", "logistics"])), 2);
        assert_eq!(derive_priority(&normalize_tags(["logistics"])), 3);
        assert_eq!(derive_priority(&normalize_tags(["friendly"])), 3);
        assert_eq!(derive_priority(&normalize_tags(["terrain", "friendly"])), 4);
        assert_eq!(derive_priority(&normalize_tags(["human", "text"])), 4);
        assert_eq!(derive_priority(&normalize_tags(Vec::<String>::new())), 4);
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags([" Enemy ", "ARMOR", ""]);
        assert_eq!(
            tags,
            BTreeSet::from(["enemy".to_string(), "armor".to_string()])
        );

        let empty = normalize_tags(["  "]);
        assert_eq!(empty, BTreeSet::from([UNCLASSIFIED_TAG.to_string()]));
    }

    #[test]
    fn test_normalized_report_defaults_and_clamps() {
        let raw = ObservationReport::new(ChannelId(1), "s", t0()).with_confidence(250.0);
        let n = NormalizedReport::new(raw, 10.0, 20.0, "latlon".into(), 70.0).unwrap();
        assert_eq!(n.confidence, 100.0);

        let raw = ObservationReport::new(ChannelId(1), "s", t0());
        let n = NormalizedReport::new(raw, 10.0, 20.0, "latlon".into(), 70.0).unwrap();
        assert_eq!(n.confidence, 70.0);
        assert!(n.tags.contains(UNCLASSIFIED_TAG));

        let raw = ObservationReport::new(ChannelId(1), "s", t0());
        assert!(NormalizedReport::new(raw, 95.0, 20.0, "latlon".into(), 70.0).is_err());
    }

    #[test]
    fn test_fuse_averages_and_unions() {
        let first = report("a", 10.0, 20.0, &["enemy"], 80.0);
        let mut obs = Observation::from_report(ObservationId::new(), &first, t0());

        let mut second = report("b", 10.002, 20.002, &["armor", "enemy"], 90.0);
        second.observed_at = t0() + chrono::Duration::seconds(30);
        second.accuracy_m = Some(40.0);
        MergeEngine::fuse(&mut obs, &second, t0());

        assert_relative_eq!(obs.confidence, 85.0, epsilon = 1e-9);
        assert_relative_eq!(obs.position.lat, 10.001, epsilon = 1e-9);
        assert_relative_eq!(obs.position.lon, 20.001, epsilon = 1e-9);
        assert_eq!(obs.timestamp, second.observed_at);
        assert_eq!(obs.accuracy_m, Some(40.0));
        assert!(obs.tags.contains("armor") && obs.tags.contains("enemy"));
        assert!(obs.sources.contains("a") && obs.sources.contains("b"));
    }

    #[test]
    fn test_fuse_keeps_newer_timestamp_and_accuracy() {
        let mut first = report("a", 10.0, 20.0, &["enemy"], 80.0);
        first.accuracy_m = Some(25.0);
        first.observed_at = t0() + chrono::Duration::minutes(5);
        let mut obs = Observation::from_report(ObservationId::new(), &first, t0());

        let older = report("b", 10.0, 20.0, &["enemy"], 60.0);
        MergeEngine::fuse(&mut obs, &older, t0());

        assert_eq!(obs.timestamp, first.observed_at);
        assert_eq!(obs.accuracy_m, Some(25.0));
        assert_eq!(obs.priority, 2);
    }

    #[test]
    fn test_qualifies_gates() {
        let engine = MergeEngine::new(&SitmapConfig::default());
        let base = report("a", 10.0, 20.0, &["logistics"], 70.0);
        let obs = Observation::from_report(ObservationId::new(), &base, t0());

        // ~50 m away, same tag, same time
        let near = report("b", 10.00045, 20.0, &["logistics"], 70.0);
        assert!(engine.qualifies(&obs, &near));

        // Same place, disjoint tags
        let other_tag = report("c", 10.0, 20.0, &["enemy"], 70.0);
        assert!(!engine.qualifies(&obs, &other_tag));

        // Same place and tag, outside the time window
        let mut late = report("d", 10.0, 20.0, &["logistics"], 70.0);
        late.observed_at = t0() + chrono::Duration::minutes(121);
        assert!(!engine.qualifies(&obs, &late));

        // Same tag and time, ~220 m away (beyond half the threshold)
        let far = report("e", 10.002, 20.0, &["logistics"], 70.0);
        assert!(!engine.qualifies(&obs, &far));
    }
}
