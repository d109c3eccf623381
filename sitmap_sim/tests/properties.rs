//! Property tests for the aggregation engine.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use sitmap_core::{
    cluster_observations, MergeEngine, NormalizedReport, ObservationId, ObservationReport,
    ObservationStore, RenderOptions, SitmapConfig, SitmapEngine,
};
use sitmap_env::{ChannelId, ManualContext};
use sitmap_sim::offset_coordinate;
use std::collections::BTreeSet;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn engine(capacity: usize) -> SitmapEngine<ManualContext> {
    let config = SitmapConfig {
        capacity,
        ..Default::default()
    };
    SitmapEngine::new(ManualContext::shared(t0()), config).unwrap()
}

fn origin() -> sitmap_core::Coordinate {
    sitmap_core::Coordinate::new(60.17, 24.94).unwrap()
}

proptest! {
    #[test]
    fn prop_redelivery_never_duplicates(
        deliveries in prop::collection::vec((0usize..6, -50.0f64..50.0, -50.0f64..50.0, 0i64..600), 1..60)
    ) {
        let engine = engine(300);
        let mut sources = BTreeSet::new();

        for (source, east, north, secs) in deliveries {
            // Each source reports its own far-apart event
            let pos = offset_coordinate(origin(), source as f64 * 5000.0 + east, north);
            let report = ObservationReport::new(ChannelId(1), format!("s{}", source), t0() + Duration::seconds(secs))
                .at(pos.lat, pos.lon)
                .with_tags(["enemy"]);
            engine.upsert(report).unwrap();
            sources.insert(format!("s{}", source));
        }

        let observations = engine.list_by_channel(ChannelId(1));
        prop_assert_eq!(observations.len(), sources.len());

        let registered: usize = observations.iter().map(|o| o.sources.len()).sum();
        prop_assert_eq!(registered, sources.len());
    }

    #[test]
    fn prop_capacity_bound_and_oldest_first(capacity in 1usize..20, extra in 0usize..20) {
        let engine = engine(capacity);
        let total = capacity + extra;
        let mut ids: Vec<ObservationId> = Vec::new();

        for i in 0..total {
            let pos = offset_coordinate(origin(), (i % 10) as f64 * 1000.0, (i / 10) as f64 * 1000.0);
            let report = ObservationReport::new(ChannelId(1), format!("s{}", i), t0() + Duration::seconds(i as i64))
                .at(pos.lat, pos.lon)
                .with_tags(["logistics"]);
            ids.push(engine.upsert(report).unwrap().id);
            prop_assert!(engine.observation_count(ChannelId(1)) <= capacity);
        }

        let remaining: Vec<ObservationId> = engine
            .list_by_channel(ChannelId(1))
            .iter()
            .map(|o| o.id)
            .collect();
        prop_assert_eq!(remaining, ids[total - capacity..].to_vec());
    }

    #[test]
    fn prop_merge_averages_confidence(x in 0.0f64..=100.0, y in 0.0f64..=100.0) {
        let engine = engine(300);
        let pos = origin();
        engine.upsert(
            ObservationReport::new(ChannelId(1), "a", t0())
                .at(pos.lat, pos.lon)
                .with_tags(["enemy", "armor"])
                .with_confidence(y),
        ).unwrap();

        let near = offset_coordinate(pos, 0.0, 40.0);
        let merged = engine.upsert(
            ObservationReport::new(ChannelId(1), "b", t0() + Duration::minutes(1))
                .at(near.lat, near.lon)
                .with_tags(["enemy", "recon"])
                .with_confidence(x),
        ).unwrap();

        prop_assert_eq!(engine.observation_count(ChannelId(1)), 1);
        prop_assert!((merged.confidence - (x + y) / 2.0).abs() < 1e-9);
        let tags: BTreeSet<String> = ["armor", "enemy", "recon"].iter().map(|s| s.to_string()).collect();
        prop_assert_eq!(merged.tags, tags);
    }

    #[test]
    fn prop_clustering_deterministic(
        points in prop::collection::vec((-3000.0f64..3000.0, -3000.0f64..3000.0), 1..40)
    ) {
        let engine = engine(300);
        for (i, (east, north)) in points.iter().enumerate() {
            let pos = offset_coordinate(origin(), *east, *north);
            engine.upsert(
                ObservationReport::new(ChannelId(1), format!("s{}", i), t0() + Duration::seconds(i as i64))
                    .at(pos.lat, pos.lon)
                    .with_tags([format!("tag{}", i)]),
            ).unwrap();
        }

        let input = engine.list_by_channel(ChannelId(1));
        let partition = |threshold: f64| -> Vec<Vec<ObservationId>> {
            cluster_observations(&input, threshold)
                .iter()
                .map(|c| c.members.iter().map(|o| o.id).collect())
                .collect()
        };
        prop_assert_eq!(partition(250.0), partition(250.0));

        let members: usize = partition(250.0).iter().map(Vec::len).sum();
        prop_assert_eq!(members, input.len());
    }

    #[test]
    fn prop_indexed_candidate_matches_linear_scan(
        resolution in 0u8..=15,
        radius in 5.0f64..3000.0,
        points in prop::collection::vec((-4.0f64..4.0, -4.0f64..4.0), 1..60),
        query in (-2.0f64..2.0, -2.0f64..2.0),
    ) {
        let config = SitmapConfig {
            h3_resolution: resolution,
            cluster_threshold_m: radius * 2.0,
            ..Default::default()
        };
        let mut store = ObservationStore::new(&config);
        let merge = MergeEngine::new(&config);

        for (i, (east, north)) in points.iter().enumerate() {
            let pos = offset_coordinate(origin(), east * radius, north * radius);
            let raw = ObservationReport::new(ChannelId(1), format!("s{}", i), t0())
                .with_tags([format!("tag{}", i)]);
            let report = NormalizedReport::new(raw, pos.lat, pos.lon, "latlon".into(), 70.0).unwrap();
            store.upsert(report, t0()).unwrap();
        }

        let pos = offset_coordinate(origin(), query.0 * radius, query.1 * radius);
        let raw = ObservationReport::new(ChannelId(1), "query", t0())
            .with_tags((0..points.len()).map(|i| format!("tag{}", i)));
        let report = NormalizedReport::new(raw, pos.lat, pos.lon, "latlon".into(), 70.0).unwrap();

        let channel = store.channel(ChannelId(1)).unwrap();
        let linear = channel
            .snapshot()
            .iter()
            .filter(|obs| merge.qualifies(obs, &report))
            .map(|obs| obs.id)
            .min();
        prop_assert_eq!(merge.find_candidate(channel, &report), linear);
    }

    #[test]
    fn prop_first_diff_is_all_new(count in 1usize..15) {
        let engine = engine(300);
        let mut ids = BTreeSet::new();
        for i in 0..count {
            let pos = offset_coordinate(origin(), i as f64 * 1000.0, 0.0);
            let obs = engine.upsert(
                ObservationReport::new(ChannelId(1), format!("s{}", i), t0())
                    .at(pos.lat, pos.lon)
                    .with_tags(["enemy"]),
            ).unwrap();
            ids.insert(obs.id);
        }

        let model = engine
            .render_model(ChannelId(1), RenderOptions::default().with_diff(true))
            .unwrap();
        let diff = model.diff.unwrap();
        prop_assert_eq!(diff.new_ids, ids);
        prop_assert!(diff.moved.is_empty());
        prop_assert!(diff.stale.is_empty());
    }
}

#[test]
fn test_engine_shared_across_threads() {
    let engine = Arc::new(engine(300));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let pos = offset_coordinate(origin(), i as f64 * 1000.0, t as f64 * 1000.0);
                    let report = ObservationReport::new(ChannelId(t), format!("s{}", i), t0())
                        .at(pos.lat, pos.lon)
                        .with_tags(["enemy"]);
                    engine.upsert(report.clone()).unwrap();
                    engine.upsert(report).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    for t in 0..4 {
        assert_eq!(engine.observation_count(ChannelId(t)), 25);
    }
}
