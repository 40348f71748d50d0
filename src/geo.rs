//! Geospatial helpers shared by the encoder and the hotspot aggregator
//!
//! Locations are bucketed into a fixed-size lat/lon grid rather than used
//! raw, which bounds feature cardinality and makes hotspot clustering a
//! simple neighbourhood walk.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (haversine).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in metres.
    pub fn haversine_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Mean of a set of points. `None` for an empty set.
    pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
        let lon = points.iter().map(|p| p.lon).sum::<f64>() / n;
        Some(GeoPoint { lat, lon })
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A cell of the lat/lon grid, addressed by row (latitude) and column (longitude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub row: i64,
    pub col: i64,
}

impl GridCell {
    /// Cell containing `point` for a grid of `cell_deg` degrees.
    pub fn of(point: &GeoPoint, cell_deg: f64) -> Self {
        Self {
            row: (point.lat / cell_deg).floor() as i64,
            col: (point.lon / cell_deg).floor() as i64,
        }
    }

    /// The eight surrounding cells.
    pub fn neighbours(&self) -> impl Iterator<Item = GridCell> + '_ {
        (-1..=1_i64).flat_map(move |dr| {
            (-1..=1_i64)
                .filter(move |&dc| dr != 0 || dc != 0)
                .map(move |dc| GridCell {
                    row: self.row + dr,
                    col: self.col + dc,
                })
        })
    }

    /// Stable string key, used as a zone vocabulary entry.
    pub fn key(&self) -> String {
        format!("cell:{}:{}", self.row, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Paris -> London is roughly 344 km
        let paris = GeoPoint::new(48.8566, 2.3522);
        let london = GeoPoint::new(51.5074, -0.1278);
        let d = paris.haversine_m(&london);
        assert!((d - 343_500.0).abs() < 2_000.0, "got {d}");
        assert_eq!(paris.haversine_m(&paris), 0.0);
    }

    #[test]
    fn test_grid_cell_negative_coordinates_floor() {
        let cell = GridCell::of(&GeoPoint::new(-0.005, -0.015), 0.01);
        assert_eq!(cell, GridCell { row: -1, col: -2 });
        assert_eq!(cell.key(), "cell:-1:-2");
    }

    #[test]
    fn test_neighbours_excludes_self() {
        let cell = GridCell { row: 3, col: 4 };
        let n: Vec<_> = cell.neighbours().collect();
        assert_eq!(n.len(), 8);
        assert!(!n.contains(&cell));
        assert!(n.contains(&GridCell { row: 2, col: 5 }));
    }

    #[test]
    fn test_centroid() {
        assert!(GeoPoint::centroid(&[]).is_none());
        let c = GeoPoint::centroid(&[GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 4.0)]).unwrap();
        assert_eq!(c, GeoPoint::new(2.0, 3.0));
    }
}
