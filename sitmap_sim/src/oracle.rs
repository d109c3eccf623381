//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated area:
//! - True positions of all reported events
//! - Report generation (with Gaussian position jitter) for any observer

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sitmap_core::{Coordinate, ObservationReport};
use sitmap_env::ChannelId;
use std::collections::BTreeMap;

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A real-world event that observers report on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthEvent {
    /// Unique event ID
    pub id: u64,

    /// True position
    pub position: Coordinate,

    pub tags: Vec<String>,
    pub what: String,
    pub amount: Option<f64>,

    /// When the event happened
    pub observed_at: DateTime<Utc>,
}

/// The Oracle - maintains ground truth and generates field reports.
pub struct Oracle {
    /// RNG for jitter and random choices
    physics_rng: ChaCha8Rng,

    /// Local origin all offsets are measured from
    origin: Coordinate,

    events: BTreeMap<u64, GroundTruthEvent>,

    next_id: u64,

    /// Position noise standard deviation (meters)
    position_noise_std: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    pub fn new(physics_seed: u64, origin: Coordinate) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            origin,
            events: BTreeMap::new(),
            next_id: 0,
            position_noise_std: 5.0,
        }
    }

    /// Sets the position noise standard deviation.
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = std_dev.max(0.0);
    }

    /// Position `east_m` / `north_m` meters from the origin.
    pub fn offset(&self, east_m: f64, north_m: f64) -> Coordinate {
        offset_coordinate(self.origin, east_m, north_m)
    }

    /// Spawns a new event and returns its ID.
    pub fn spawn_event(
        &mut self,
        east_m: f64,
        north_m: f64,
        tags: &[&str],
        what: &str,
        amount: Option<f64>,
        observed_at: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let event = GroundTruthEvent {
            id,
            position: self.offset(east_m, north_m),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            what: what.to_string(),
            amount,
            observed_at,
        };
        self.events.insert(id, event);
        id
    }

    /// Moves an event by the given offset.
    pub fn move_event(&mut self, id: u64, east_m: f64, north_m: f64) {
        if let Some(event) = self.events.get_mut(&id) {
            event.position = offset_coordinate(event.position, east_m, north_m);
        }
    }

    pub fn event(&self, id: u64) -> Option<&GroundTruthEvent> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &GroundTruthEvent> {
        self.events.values()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Uniform integer in `[lo, hi]`.
    pub fn random_range(&mut self, lo: u64, hi: u64) -> u64 {
        self.physics_rng.gen_range(lo..=hi)
    }

    /// A jittered report of an event by one observer.
    ///
    /// The source-id is stable per (observer, event), so generating the
    /// same report twice models re-delivery.
    pub fn generate_report(
        &mut self,
        channel: ChannelId,
        event_id: u64,
        observer: usize,
        delay: Duration,
    ) -> Option<ObservationReport> {
        let event = self.events.get(&event_id)?.clone();

        let (east, north) = match Normal::new(0.0, self.position_noise_std) {
            Ok(normal) => (
                normal.sample(&mut self.physics_rng),
                normal.sample(&mut self.physics_rng),
            ),
            Err(_) => (0.0, 0.0),
        };
        let position = offset_coordinate(event.position, east, north);

        let report = ObservationReport::new(
            channel,
            source_id(observer, event_id),
            event.observed_at + delay,
        )
        .at(position.lat, position.lon)
        .with_text(format!("{} spotted", event.what))
        .with_what(event.what.clone(), event.amount)
        .with_observer(format!("observer-{}", observer))
        .with_tags(event.tags.iter().cloned())
        .with_accuracy(self.position_noise_std.max(1.0) * 2.0);

        Some(report)
    }

    /// True positions of all events, by id.
    pub fn ground_truth_positions(&self) -> Vec<(u64, Coordinate)> {
        self.events.values().map(|e| (e.id, e.position)).collect()
    }
}

/// Source-id an observer uses for an event.
pub fn source_id(observer: usize, event_id: u64) -> String {
    format!("obs{}-evt{}", observer, event_id)
}

/// Flat-earth offset, adequate for the few kilometers scenarios span.
pub fn offset_coordinate(from: Coordinate, east_m: f64, north_m: f64) -> Coordinate {
    let lat = from.lat + north_m / METERS_PER_DEGREE;
    let lon = from.lon + east_m / (METERS_PER_DEGREE * from.lat.to_radians().cos());
    Coordinate { lat, lon }
}
