//! The "GEO" Engine - great-circle distance and H3 spatial pruning
//!
//! Two concerns live here:
//! - `Coordinate` and the haversine distance every other engine measures with
//! - `SpatialIndex`, an H3 cell → observation-id map used to prune the merge
//!   candidate scan to the neighbourhood of an incoming report

use geo::{HaversineDistance, Point};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A validated WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(GeoError::NonFinite { lat, lon });
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::OutOfRange { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance to `other` in meters.
    #[inline]
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_distance_m(*self, *other)
    }

    /// Midpoint of two nearby positions.
    ///
    /// Longitude is averaged along the shorter arc, so inputs on either side
    /// of the antimeridian stay near ±180° instead of collapsing to 0°.
    pub fn mean_with(&self, other: &Coordinate) -> Coordinate {
        Coordinate {
            lat: (self.lat + other.lat) / 2.0,
            lon: wrap_longitude(self.lon + longitude_delta(self.lon, other.lon) / 2.0),
        }
    }

    /// H3 cell containing this position at the given resolution.
    pub fn to_cell(&self, resolution: Resolution) -> Result<CellIndex, GeoError> {
        let latlng = LatLng::new(self.lat, self.lon)
            .map_err(|e| GeoError::InvalidCell(format!("{:?}", e)))?;
        Ok(latlng.to_cell(resolution))
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lon)
    }
}

/// Haversine distance between two positions in meters.
pub fn haversine_distance_m(a: Coordinate, b: Coordinate) -> f64 {
    Point::new(a.lon, a.lat).haversine_distance(&Point::new(b.lon, b.lat))
}

/// Signed shortest longitude difference `to - from`, in [-180, 180).
pub fn longitude_delta(from: f64, to: f64) -> f64 {
    wrap_longitude(to - from)
}

/// Normalise a longitude into [-180, 180], keeping +180 for positive input.
pub fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Number of H3 rings that must be searched so that every point within
/// `radius_m` of a point in the centre cell is covered.
///
/// Neighbouring cell centres are never closer than half the average edge
/// length at any resolution, so that is the ring step. Two extra rings
/// absorb the offset of both points from their cell centres.
pub fn rings_for_radius(resolution: Resolution, radius_m: f64) -> u32 {
    let step = resolution.edge_length_m() * 0.5;
    let rings = (radius_m.max(0.0) / step).ceil() + 2.0;
    if rings >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        rings as u32
    }
}

/// Number of cells in a k-ring disk: 3k(k+1) + 1.
pub fn grid_disk_size(k: u32) -> u64 {
    let k = u64::from(k);
    3u64.saturating_mul(k)
        .saturating_mul(k.saturating_add(1))
        .saturating_add(1)
}

// ============================================================================
// SPATIAL INDEX (H3 → ids)
// ============================================================================

/// Maps H3 cells to the set of ids located within that cell.
#[derive(Debug, Clone)]
pub struct SpatialIndex<Id> {
    cells: HashMap<CellIndex, HashSet<Id>>,
    resolution: Resolution,
}

impl<Id: Copy + Eq + Hash> SpatialIndex<Id> {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            cells: HashMap::new(),
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Insert an id into a cell.
    pub fn insert(&mut self, cell: CellIndex, id: Id) {
        self.cells.entry(cell).or_default().insert(id);
    }

    /// Remove an id from a cell, dropping the cell once empty.
    pub fn remove(&mut self, cell: CellIndex, id: Id) {
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(&id);
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Move an id between cells if its cell changed.
    pub fn reindex(&mut self, id: Id, old_cell: CellIndex, new_cell: CellIndex) {
        if old_cell != new_cell {
            self.remove(old_cell, id);
            self.insert(new_cell, id);
        }
    }

    /// All ids within `cell` and its k-ring neighbours.
    pub fn query_kring(&self, cell: CellIndex, k: u32) -> HashSet<Id> {
        let mut result = HashSet::new();
        for neighbor in cell.grid_disk_safe(k) {
            if let Some(ids) = self.cells.get(&neighbor) {
                result.extend(ids.iter().copied());
            }
        }
        result
    }

    /// All ids that may lie within `radius_m` of `center`.
    ///
    /// A superset: callers still apply the exact distance gate.
    pub fn query_radius(&self, center: CellIndex, radius_m: f64) -> HashSet<Id> {
        self.query_kring(center, rings_for_radius(self.resolution, radius_m))
    }

    pub fn stats(&self) -> SpatialIndexStats {
        let total_cells = self.cells.len();
        let total_entries: usize = self.cells.values().map(|s| s.len()).sum();
        let avg_per_cell = if total_cells > 0 {
            total_entries as f64 / total_cells as f64
        } else {
            0.0
        };

        SpatialIndexStats {
            total_cells,
            total_entries,
            avg_per_cell,
        }
    }
}

/// Statistics about the spatial index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpatialIndexStats {
    pub total_cells: usize,
    pub total_entries: usize,
    pub avg_per_cell: f64,
}

/// Errors produced while validating or indexing positions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("Non-finite coordinates: {lat}, {lon}")]
    NonFinite { lat: f64, lon: f64 },

    #[error("Coordinates out of range: {lat}, {lon}")]
    OutOfRange { lat: f64, lon: f64 },

    #[error("Cannot index coordinates: {0}")]
    InvalidCell(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn helsinki() -> Coordinate {
        Coordinate::new(60.1699, 24.9384).unwrap()
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = helsinki();
        assert_relative_eq!(p.distance_m(&p), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let a = Coordinate::new(10.0, 20.0).unwrap();
        let b = Coordinate::new(11.0, 20.0).unwrap();

        // One degree of latitude is ~111.2 km on a spherical earth
        assert_relative_eq!(a.distance_m(&b), 111_195.0, max_relative = 0.001);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = helsinki();
        let b = Coordinate::new(59.4370, 24.7536).unwrap(); // Tallinn
        assert_relative_eq!(a.distance_m(&b), b.distance_m(&a), epsilon = 1e-6);
        assert!(a.distance_m(&b) > 80_000.0 && a.distance_m(&b) < 90_000.0);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(matches!(
            Coordinate::new(91.0, 0.0),
            Err(GeoError::OutOfRange { .. })
        ));
        assert!(matches!(
            Coordinate::new(0.0, -180.5),
            Err(GeoError::OutOfRange { .. })
        ));
        assert!(matches!(
            Coordinate::new(f64::NAN, 0.0),
            Err(GeoError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_mean_with() {
        let a = Coordinate::new(10.0, 20.0).unwrap();
        let b = Coordinate::new(10.002, 20.004).unwrap();
        let m = a.mean_with(&b);

        assert_relative_eq!(m.lat, 10.001, epsilon = 1e-12);
        assert_relative_eq!(m.lon, 20.002, epsilon = 1e-12);
    }

    #[test]
    fn test_spatial_index_query_finds_neighbors() {
        let mut index = SpatialIndex::new(Resolution::Nine);
        let a = helsinki();
        // ~100 m north
        let b = Coordinate::new(a.lat + 0.0009, a.lon).unwrap();

        let cell_a = a.to_cell(Resolution::Nine).unwrap();
        let cell_b = b.to_cell(Resolution::Nine).unwrap();
        index.insert(cell_b, 7u32);

        let found = index.query_radius(cell_a, 125.0);
        assert!(found.contains(&7));
    }

    #[test]
    fn test_spatial_index_remove_and_reindex() {
        let mut index = SpatialIndex::new(Resolution::Nine);
        let a = helsinki().to_cell(Resolution::Nine).unwrap();
        let far = Coordinate::new(59.4370, 24.7536)
            .unwrap()
            .to_cell(Resolution::Nine)
            .unwrap();

        index.insert(a, 1u32);
        assert_eq!(index.stats().total_entries, 1);

        index.reindex(1, a, far);
        assert!(index.query_kring(a, 0).is_empty());
        assert!(index.query_kring(far, 0).contains(&1));

        index.remove(far, 1);
        assert_eq!(index.stats(), SpatialIndexStats::default());
    }

    #[test]
    fn test_mean_with_across_antimeridian() {
        let east = Coordinate::new(0.0, 179.9999).unwrap();
        let west = Coordinate::new(0.0, -179.9999).unwrap();

        let m = east.mean_with(&west);
        assert_relative_eq!(m.lon.abs(), 180.0, epsilon = 1e-9);
        assert!(Coordinate::new(m.lat, m.lon).is_ok());
        assert!(m.distance_m(&east) < 20.0);

        let m = west.mean_with(&east);
        assert_relative_eq!(m.lon.abs(), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_longitude() {
        assert_relative_eq!(wrap_longitude(190.0), -170.0, epsilon = 1e-9);
        assert_relative_eq!(wrap_longitude(-190.0), 170.0, epsilon = 1e-9);
        assert_relative_eq!(wrap_longitude(180.0), 180.0);
        assert_relative_eq!(wrap_longitude(-180.0), -180.0);
        assert_relative_eq!(longitude_delta(179.0, -179.0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(longitude_delta(-179.0, 179.0), -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rings_cover_radius_at_every_resolution() {
        for res in 0u8..=15 {
            let resolution = Resolution::try_from(res).unwrap();
            for radius in [0.0, 0.4, 12.5, 125.0, 5_000.0] {
                let rings = rings_for_radius(resolution, radius);
                let reach = f64::from(rings - 2) * resolution.edge_length_m() * 0.5;
                assert!(reach >= radius, "res {} radius {}", res, radius);
            }
        }
    }

    #[test]
    fn test_spatial_index_finest_resolution_reaches_merge_radius() {
        let mut index = SpatialIndex::new(Resolution::Fifteen);
        let a = helsinki();
        // ~22 m north; a 1 m ring step only reaches ~13 m at this resolution
        let b = Coordinate::new(a.lat + 0.0002, a.lon).unwrap();
        index.insert(b.to_cell(Resolution::Fifteen).unwrap(), 3u32);

        let found = index.query_radius(a.to_cell(Resolution::Fifteen).unwrap(), 25.0);
        assert!(found.contains(&3));
    }

    #[test]
    fn test_grid_disk_size() {
        assert_eq!(grid_disk_size(0), 1);
        assert_eq!(grid_disk_size(1), 7);
        assert_eq!(grid_disk_size(2), 19);
        assert_eq!(grid_disk_size(u32::MAX), u64::MAX);
    }

    #[test]
    fn test_rings_for_radius_grows_with_radius() {
        let small = rings_for_radius(Resolution::Nine, 50.0);
        let large = rings_for_radius(Resolution::Nine, 2_000.0);
        assert!(small >= 1);
        assert!(large > small);
    }
}
