//! Region definitions and coordinate-to-region lookup.
//!
//! Regions are plain bounding boxes taken from configuration. They may overlap,
//! so a point can carry zero, one or several region tags.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A named bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    /// Tag attached to records inside the box (e.g. "UAE").
    pub name: String,

    /// ISO 3166-1 alpha-2 code, if the region is a country.
    #[serde(default)]
    pub code: Option<String>,

    pub min_lat: f64,
    pub max_lat: f64,

    /// Western edge. When greater than `max_lon` the box wraps the antimeridian.
    pub min_lon: f64,

    /// Eastern edge.
    pub max_lon: f64,
}

impl RegionDefinition {
    /// Whether the point lies inside the box (edges inclusive).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if latitude < self.min_lat || latitude > self.max_lat {
            return false;
        }

        if self.min_lon <= self.max_lon {
            longitude >= self.min_lon && longitude <= self.max_lon
        } else {
            longitude >= self.min_lon || longitude <= self.max_lon
        }
    }

    /// Centre of the box as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        let lat = (self.min_lat + self.max_lat) / 2.0;
        let lon = if self.min_lon <= self.max_lon {
            (self.min_lon + self.max_lon) / 2.0
        } else {
            let mid = (self.min_lon + self.max_lon + 360.0) / 2.0;
            if mid > 180.0 { mid - 360.0 } else { mid }
        };
        (lat, lon)
    }
}

/// Lookup table over all configured regions.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions: Vec<RegionDefinition>,
}

impl RegionIndex {
    pub fn new(regions: Vec<RegionDefinition>) -> Self {
        Self { regions }
    }

    /// Names of every region containing the point.
    pub fn tags_for(&self, latitude: f64, longitude: f64) -> BTreeSet<String> {
        self.regions
            .iter()
            .filter(|r| r.contains(latitude, longitude))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Find a region by name or code (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&RegionDefinition> {
        self.regions.iter().find(|r| {
            r.name.eq_ignore_ascii_case(name)
                || r.code.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(name))
        })
    }

    /// Resolve a user-supplied region filter to its canonical tag.
    ///
    /// Accepts the name or the country code, so "AE" and "uae" both resolve to "UAE".
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).map(|r| r.name.as_str())
    }

    pub fn regions(&self) -> &[RegionDefinition] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uae() -> RegionDefinition {
        RegionDefinition {
            name: "UAE".to_string(),
            code: Some("AE".to_string()),
            min_lat: 22.5,
            max_lat: 26.5,
            min_lon: 51.0,
            max_lon: 56.5,
        }
    }

    fn canada() -> RegionDefinition {
        RegionDefinition {
            name: "Canada".to_string(),
            code: Some("CA".to_string()),
            min_lat: 41.0,
            max_lat: 84.0,
            min_lon: -141.0,
            max_lon: -52.0,
        }
    }

    #[test]
    fn test_point_in_single_region() {
        let index = RegionIndex::new(vec![uae(), canada()]);

        // Dubai
        let tags = index.tags_for(25.2048, 55.2708);
        assert_eq!(tags, BTreeSet::from(["UAE".to_string()]));

        // Calgary
        let tags = index.tags_for(51.0447, -114.0719);
        assert_eq!(tags, BTreeSet::from(["Canada".to_string()]));
    }

    #[test]
    fn test_point_outside_all_regions() {
        let index = RegionIndex::new(vec![uae(), canada()]);

        // Tokyo
        assert!(index.tags_for(35.6762, 139.6503).is_empty());
    }

    #[test]
    fn test_overlapping_regions() {
        let gulf = RegionDefinition {
            name: "Gulf".to_string(),
            code: None,
            min_lat: 20.0,
            max_lat: 30.0,
            min_lon: 48.0,
            max_lon: 60.0,
        };
        let index = RegionIndex::new(vec![uae(), gulf]);

        let tags = index.tags_for(24.45, 54.38);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("UAE"));
        assert!(tags.contains("Gulf"));
    }

    #[test]
    fn test_edges_are_inclusive() {
        let region = uae();
        assert!(region.contains(22.5, 51.0));
        assert!(region.contains(26.5, 56.5));
        assert!(!region.contains(26.51, 56.5));
    }

    #[test]
    fn test_antimeridian_wrap() {
        let pacific = RegionDefinition {
            name: "Fiji".to_string(),
            code: Some("FJ".to_string()),
            min_lat: -21.0,
            max_lat: -12.0,
            min_lon: 176.0,
            max_lon: -178.0,
        };

        assert!(pacific.contains(-17.0, 178.5));
        assert!(pacific.contains(-17.0, -179.0));
        assert!(!pacific.contains(-17.0, 170.0));

        let (_, lon) = pacific.center();
        assert!((lon - 179.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_by_code() {
        let index = RegionIndex::new(vec![uae(), canada()]);
        assert_eq!(index.resolve("ae"), Some("UAE"));
        assert_eq!(index.resolve("canada"), Some("Canada"));
        assert_eq!(index.resolve("Mars"), None);
    }
}
