//! Minimal GeoJSON geometry types shared by the feature-collection sources.

use serde::{Deserialize, Serialize};

/// A GeoJSON position: `[longitude, latitude, (altitude)]`.
pub type Position = Vec<f64>;

/// The geometry kinds the feeds actually emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: Position,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    #[serde(other)]
    Unsupported,
}

impl Geometry {
    /// A single (latitude, longitude) for the geometry.
    ///
    /// Points return themselves; polygons return the mean of their outer ring's
    /// vertices. Returns `None` when there is nothing usable.
    pub fn representative_point(&self) -> Option<(f64, f64)> {
        match self {
            Geometry::Point { coordinates } => lat_lon(coordinates),
            Geometry::Polygon { coordinates } => ring_centroid(coordinates.first()?),
            Geometry::MultiPolygon { coordinates } => ring_centroid(coordinates.first()?.first()?),
            Geometry::Unsupported => None,
        }
    }

    /// Third coordinate of a point (depth for seismic events).
    pub fn altitude(&self) -> Option<f64> {
        match self {
            Geometry::Point { coordinates } => coordinates.get(2).copied(),
            _ => None,
        }
    }
}

fn lat_lon(position: &[f64]) -> Option<(f64, f64)> {
    match position {
        [lon, lat, ..] => Some((*lat, *lon)),
        _ => None,
    }
}

fn ring_centroid(ring: &[Position]) -> Option<(f64, f64)> {
    // Closed rings repeat the first vertex at the end.
    let vertices = match ring {
        [first, rest @ .., last] if first == last && !rest.is_empty() => &ring[..ring.len() - 1],
        _ => ring,
    };

    let points: Vec<(f64, f64)> = vertices.iter().filter_map(|p| lat_lon(p)).collect();
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let lat = points.iter().map(|(lat, _)| lat).sum::<f64>() / n;

    let (min_lon, max_lon) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, lon)| {
            (lo.min(*lon), hi.max(*lon))
        });
    // A ring spanning more than half the globe crosses the antimeridian.
    let wraps = max_lon - min_lon > 180.0;
    let lon = points
        .iter()
        .map(|(_, lon)| if wraps && *lon < 0.0 { lon + 360.0 } else { *lon })
        .sum::<f64>()
        / n;
    let lon = if lon > 180.0 { lon - 360.0 } else { lon };

    Some((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_is_lon_lat() {
        let geometry: Geometry =
            serde_json::from_str(r#"{"type": "Point", "coordinates": [55.27, 25.20, 10.0]}"#)
                .unwrap();

        assert_eq!(geometry.representative_point(), Some((25.20, 55.27)));
        assert_eq!(geometry.altitude(), Some(10.0));
    }

    #[test]
    fn test_polygon_centroid_ignores_closing_vertex() {
        let geometry: Geometry = serde_json::from_str(
            r#"{"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]]]}"#,
        )
        .unwrap();

        assert_eq!(geometry.representative_point(), Some((1.0, 1.0)));
    }

    #[test]
    fn test_polygon_centroid_across_antimeridian() {
        let geometry: Geometry = serde_json::from_str(
            r#"{"type": "Polygon", "coordinates": [[[179,51],[-179,51],[-179,53],[179,53],[179,51]]]}"#,
        )
        .unwrap();

        let (lat, lon) = geometry.representative_point().unwrap();
        assert_eq!(lat, 52.0);
        assert!(lon.abs() > 179.0, "centroid longitude {lon} is on the wrong side");

        // Mostly east of the line: centroid stays east.
        let geometry: Geometry = serde_json::from_str(
            r#"{"type": "Polygon", "coordinates": [[[170,51],[-178,51],[-178,53],[170,53],[170,51]]]}"#,
        )
        .unwrap();
        let (_, lon) = geometry.representative_point().unwrap();
        assert_eq!(lon, 176.0);
    }

    #[test]
    fn test_short_position_has_no_point() {
        let geometry = Geometry::Point {
            coordinates: vec![10.0],
        };
        assert_eq!(geometry.representative_point(), None);
    }

    #[test]
    fn test_unknown_geometry_type() {
        let geometry: Geometry =
            serde_json::from_str(r#"{"type": "LineString", "coordinates": [[0,0],[1,1]]}"#)
                .unwrap();
        assert_eq!(geometry, Geometry::Unsupported);
        assert_eq!(geometry.representative_point(), None);
    }
}
