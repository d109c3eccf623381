//! The "CLUSTER" Engine - greedy threshold clustering for render grouping
//!
//! Single pass over a stable input order: each observation joins the first
//! cluster whose running centroid lies within the threshold, otherwise it
//! starts a new cluster. O(n·k), deterministic for a fixed input order.

use crate::sitmap_geo::{longitude_delta, wrap_longitude, Coordinate};
use crate::sitmap_store::Observation;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// A group of observations rendered as one marker.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<Observation>,

    /// Running sums for the centroid. Longitudes are summed as shortest-arc
    /// offsets from the first member so the mean survives the antimeridian.
    lat_sum: f64,
    anchor_lon: f64,
    lon_offset_sum: f64,
}

impl Cluster {
    fn seed(obs: Observation) -> Self {
        Self {
            lat_sum: obs.lat(),
            anchor_lon: obs.lon(),
            lon_offset_sum: 0.0,
            members: vec![obs],
        }
    }

    fn push(&mut self, obs: Observation) {
        self.lat_sum += obs.lat();
        self.lon_offset_sum += longitude_delta(self.anchor_lon, obs.lon());
        self.members.push(obs);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Mean lat / mean lon over members.
    pub fn centroid(&self) -> Coordinate {
        let n = self.members.len().max(1) as f64;
        Coordinate {
            lat: self.lat_sum / n,
            lon: wrap_longitude(self.anchor_lon + self.lon_offset_sum / n),
        }
    }

    /// Highest-priority member (lowest number), ties broken by the most
    /// recent timestamp, then by input order.
    pub fn primary(&self) -> &Observation {
        let mut best = &self.members[0];
        for obs in &self.members[1..] {
            let better = obs.priority < best.priority
                || (obs.priority == best.priority && obs.timestamp > best.timestamp);
            if better {
                best = obs;
            }
        }
        best
    }

    /// Mean of members' accuracy radii, if any member has one.
    pub fn aggregated_accuracy(&self) -> Option<f64> {
        let radii: Vec<f64> = self
            .members
            .iter()
            .filter_map(|o| o.accuracy_m)
            .filter(|a| *a > 0.0)
            .collect();
        if radii.is_empty() {
            None
        } else {
            Some(radii.iter().sum::<f64>() / radii.len() as f64)
        }
    }

    /// Sum of members' amounts, if any member has one.
    pub fn total_amount(&self) -> Option<f64> {
        let mut amounts = self.members.iter().filter_map(|o| o.amount).peekable();
        amounts.peek()?;
        Some(amounts.sum())
    }
}

impl Serialize for Cluster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Cluster", 6)?;
        state.serialize_field("size", &self.len())?;
        state.serialize_field("centroid", &self.centroid())?;
        state.serialize_field("primary", &self.members.first().map(|_| self.primary().id))?;
        state.serialize_field("aggregated_accuracy", &self.aggregated_accuracy())?;
        state.serialize_field("total_amount", &self.total_amount())?;
        state.serialize_field("members", &self.members)?;
        state.end()
    }
}

/// Greedily partition observations into clusters.
pub fn cluster_observations(observations: &[Observation], threshold_m: f64) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for obs in observations {
        let home = clusters
            .iter()
            .position(|c| c.centroid().distance_m(&obs.position) <= threshold_m);

        match home {
            Some(idx) => clusters[idx].push(obs.clone()),
            None => clusters.push(Cluster::seed(obs.clone())),
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sitmap_merge::NormalizedReport;
    use crate::sitmap_store::{ObservationId, ObservationReport};
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use sitmap_env::ChannelId;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn obs(lat: f64, lon: f64, tags: &[&str], minutes: i64, accuracy: Option<f64>) -> Observation {
        let mut raw = ObservationReport::new(ChannelId(1), "s", t0() + Duration::minutes(minutes))
            .at(lat, lon)
            .with_tags(tags.iter().copied());
        raw.accuracy_m = accuracy;
        let n = NormalizedReport::new(raw, lat, lon, "latlon".into(), 70.0).unwrap();
        Observation::from_report(ObservationId::new(), &n, t0())
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_observations(&[], 250.0).is_empty());
    }

    #[test]
    fn test_nearby_points_share_cluster() {
        let input = vec![
            obs(60.0, 25.0, &["enemy"], 0, None),
            obs(60.001, 25.0, &["enemy"], 1, None), // ~111 m
            obs(61.0, 25.0, &["enemy"], 2, None),   // ~111 km
        ];
        let clusters = cluster_observations(&input, 250.0);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1].len(), 1);
        assert_relative_eq!(clusters[0].centroid().lat, 60.0005, epsilon = 1e-9);
        assert_relative_eq!(clusters[0].centroid().lon, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_primary_prefers_priority_then_recency() {
        let input = vec![
            obs(60.0, 25.0, &["terrain"], 10, None),
            obs(60.0, 25.0, &["enemy"], 0, None),
            obs(60.0, 25.0, &["enemy"], 5, None),
        ];
        let clusters = cluster_observations(&input, 250.0);
        assert_eq!(clusters.len(), 1);

        let primary = clusters[0].primary();
        assert_eq!(primary.priority, 2);
        assert_eq!(primary.timestamp, t0() + Duration::minutes(5));
    }

    #[test]
    fn test_aggregated_accuracy() {
        let input = vec![
            obs(60.0, 25.0, &["enemy"], 0, Some(20.0)),
            obs(60.0, 25.0, &["enemy"], 1, None),
            obs(60.0, 25.0, &["enemy"], 2, Some(40.0)),
        ];
        let clusters = cluster_observations(&input, 250.0);
        assert_relative_eq!(clusters[0].aggregated_accuracy().unwrap(), 30.0);

        let bare = cluster_observations(&[obs(60.0, 25.0, &["enemy"], 0, None)], 250.0);
        assert_eq!(bare[0].aggregated_accuracy(), None);
    }

    #[test]
    fn test_total_amount() {
        let mut a = obs(60.0, 25.0, &["logistics"], 0, None);
        let mut b = obs(60.0, 25.0, &["logistics"], 1, None);
        let c = obs(60.0, 25.0, &["logistics"], 2, None);
        a.amount = Some(2.0);
        b.amount = Some(3.5);

        let clusters = cluster_observations(&[a, b, c.clone()], 250.0);
        assert_relative_eq!(clusters[0].total_amount().unwrap(), 5.5);

        let none = cluster_observations(&[c], 250.0);
        assert_eq!(none[0].total_amount(), None);
    }

    #[test]
    fn test_centroid_across_antimeridian() {
        let input = vec![
            obs(0.0, 179.9999, &["enemy"], 0, None),
            obs(0.0, -179.9999, &["enemy"], 1, None),
            obs(0.0, 179.9998, &["enemy"], 2, None),
        ];
        let clusters = cluster_observations(&input, 250.0);
        assert_eq!(clusters.len(), 1);

        let centroid = clusters[0].centroid();
        assert!(centroid.lon > 179.99 || centroid.lon < -179.99);
        assert!(centroid.distance_m(&input[0].position) < 30.0);
    }

    #[test]
    fn test_serialized_cluster_carries_derived_fields() {
        let input = vec![
            obs(60.0, 25.0, &["terrain"], 0, Some(10.0)),
            obs(60.001, 25.0, &["enemy"], 1, Some(30.0)),
        ];
        let clusters = cluster_observations(&input, 250.0);
        let json = serde_json::to_value(&clusters[0]).unwrap();

        assert_eq!(json["size"], 2);
        assert_relative_eq!(json["centroid"]["lat"].as_f64().unwrap(), 60.0005, epsilon = 1e-9);
        assert_relative_eq!(json["centroid"]["lon"].as_f64().unwrap(), 25.0, epsilon = 1e-9);
        assert_eq!(json["primary"], serde_json::to_value(input[1].id).unwrap());
        assert_relative_eq!(json["aggregated_accuracy"].as_f64().unwrap(), 20.0);
        assert!(json["total_amount"].is_null());
        assert_eq!(json["members"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_deterministic_membership() {
        let input: Vec<Observation> = (0..20)
            .map(|i| obs(60.0 + (i % 5) as f64 * 0.002, 25.0, &["enemy"], i, None))
            .collect();

        let ids = |clusters: Vec<Cluster>| -> Vec<Vec<ObservationId>> {
            clusters
                .iter()
                .map(|c| c.members.iter().map(|o| o.id).collect())
                .collect()
        };

        let first = ids(cluster_observations(&input, 250.0));
        let second = ids(cluster_observations(&input, 250.0));
        assert_eq!(first, second);
    }
}
