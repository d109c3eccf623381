//! Sitmap Core - Bounded Aggregation Engine for Geotagged Field Observations
//!
//! This library turns a stream of independent, noisy field reports into a
//! small, stable situation picture per channel:
//! 1. **Duplicate Problem**: idempotent re-delivery via a source-id index
//! 2. **Many Observers Problem**: fuzzy tag + time + space merging, pruned by H3
//! 3. **Clutter Problem**: greedy threshold clustering for rendering
//! 4. **What Changed Problem**: new / moved / stale diffs against a baseline

pub mod config;
pub mod engine;
pub mod resolver;
pub mod sitmap_cluster;
pub mod sitmap_diff;
pub mod sitmap_filter;
pub mod sitmap_geo;
pub mod sitmap_live;
pub mod sitmap_merge;
pub mod sitmap_render;
pub mod sitmap_store;

// Re-export key types for convenience
pub use config::{ConfigError, SitmapConfig};
pub use engine::SitmapEngine;
pub use resolver::{CoordinateResolver, DecimalDegreesResolver, NoopResolver};
pub use sitmap_cluster::{cluster_observations, Cluster};
pub use sitmap_diff::{DiffResult, Movement, SnapshotDiffEngine, SnapshotEntry};
pub use sitmap_filter::ChannelPreferences;
pub use sitmap_geo::{Coordinate, GeoError, SpatialIndexStats};
pub use sitmap_live::{LiveJobHandle, LiveUpdateScheduler, LiveUpdateSink};
pub use sitmap_merge::{MergeEngine, NormalizedReport};
pub use sitmap_render::{build_caption, RenderModel, RenderOptions};
pub use sitmap_store::{Observation, ObservationId, ObservationReport, ObservationStore};
