//! Query and filter layer over the snapshot store.
//!
//! Queries read the current snapshots, filter, order and copy. They never mutate a
//! snapshot and never wait for a refresh; a stale source simply contributes its
//! last committed records.
//!
//! # Ordering
//!
//! Disaster results are ordered by `severity_score` descending, then `timestamp`
//! descending, then `id` ascending, so equal inputs always produce the same output.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{DisasterRecord, DisasterType, ReliefCenterRecord, SeverityTier, SourceType};
use crate::storage::SnapshotStore;

/// Filters for a disaster query. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisasterQuery {
    /// Source types to include. `None` means every disaster type.
    pub source_types: Option<BTreeSet<SourceType>>,

    /// Region tag records must carry (case-insensitive).
    pub region: Option<String>,

    /// Minimum `severity_score`, inclusive.
    pub min_severity_score: Option<f64>,

    /// Maximum number of records returned.
    pub limit: Option<usize>,
}

impl DisasterQuery {
    fn includes(&self, source_type: SourceType) -> bool {
        source_type.disaster_type().is_some()
            && self
                .source_types
                .as_ref()
                .is_none_or(|types| types.contains(&source_type))
    }

    fn matches(&self, record: &DisasterRecord) -> bool {
        let region_ok = self
            .region
            .as_deref()
            .is_none_or(|region| record.in_region(region));
        let severity_ok = self
            .min_severity_score
            .is_none_or(|min| record.severity_score >= min);
        region_ok && severity_ok
    }
}

/// Result ordering: score desc, timestamp desc, id asc.
pub fn compare_disasters(a: &DisasterRecord, b: &DisasterRecord) -> Ordering {
    b.severity_score
        .total_cmp(&a.severity_score)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

/// Filtered, ordered, truncated copy of the current disaster records.
pub fn query_disasters(
    store: &SnapshotStore,
    query: &DisasterQuery,
    default_limit: usize,
) -> Vec<DisasterRecord> {
    let mut records: Vec<DisasterRecord> = SourceType::ALL
        .into_iter()
        .filter(|s| query.includes(*s))
        .flat_map(|s| {
            let snapshot = store.read(s);
            snapshot
                .records
                .disasters()
                .iter()
                .filter(|r| query.matches(r))
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();

    records.sort_by(compare_disasters);
    records.truncate(query.limit.unwrap_or(default_limit));
    records
}

/// Find one disaster record by id within a source type.
pub fn find_disaster(store: &SnapshotStore, source_type: SourceType, id: &str) -> Option<DisasterRecord> {
    store
        .read(source_type)
        .records
        .disasters()
        .iter()
        .find(|r| r.id == id)
        .cloned()
}

/// Relief centers, fullest first, then by id.
pub fn query_relief_centers(
    store: &SnapshotStore,
    region: Option<&str>,
    limit: usize,
) -> Vec<ReliefCenterRecord> {
    let snapshot = store.read(SourceType::ReliefCenter);
    let mut centers: Vec<ReliefCenterRecord> = snapshot
        .records
        .relief_centers()
        .iter()
        .filter(|c| region.is_none_or(|r| c.in_region(r)))
        .cloned()
        .collect();

    centers.sort_by(|a, b| {
        b.occupancy_rate
            .total_cmp(&a.occupancy_rate)
            .then_with(|| a.id.cmp(&b.id))
    });
    centers.truncate(limit);
    centers
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate counts over the current snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    /// Region the statistics were restricted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    pub total_disasters: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_tier: BTreeMap<SeverityTier, usize>,

    /// Disasters classified High or Critical.
    pub severe_count: usize,

    /// Earthquakes classified High or Critical.
    pub severe_earthquake_count: usize,

    /// Records whose raw severity was missing or invalid.
    pub unclassified_count: usize,

    /// Mean magnitude of classified earthquakes, if there are any.
    pub avg_earthquake_magnitude: Option<f64>,

    pub relief_centers: usize,
    pub relief_capacity_total: u64,
    pub relief_capacity_occupied: u64,

    /// Relief centers that reported more occupants than capacity.
    pub relief_inconsistent: usize,

    /// Oldest `as_of` among sources that have refreshed at least once.
    pub oldest_snapshot: Option<DateTime<Utc>>,

    /// `as_of` per source type.
    pub as_of: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl Statistics {
    /// Compute statistics from the store, optionally restricted to one region tag.
    pub fn from_store(store: &SnapshotStore, region: Option<&str>) -> Self {
        let query = DisasterQuery {
            region: region.map(str::to_string),
            ..Default::default()
        };
        let disasters = query_disasters(store, &query, usize::MAX);
        let centers = query_relief_centers(store, region, usize::MAX);

        let mut stats = Self::from_records(&disasters, &centers);
        stats.region = region.map(str::to_string);
        stats.oldest_snapshot = store.snapshots().iter().filter_map(|s| s.as_of).min();
        stats.as_of = SourceType::ALL
            .into_iter()
            .map(|s| (s.as_str().to_string(), store.read(s).as_of))
            .collect();
        stats
    }

    /// Compute statistics over the given records.
    pub fn from_records(disasters: &[DisasterRecord], centers: &[ReliefCenterRecord]) -> Self {
        let mut by_type = BTreeMap::new();
        let mut by_tier: BTreeMap<SeverityTier, usize> =
            SeverityTier::ALL.into_iter().map(|t| (t, 0)).collect();
        let mut unclassified_count = 0;
        let mut magnitudes = Vec::new();

        for record in disasters {
            *by_type
                .entry(record.disaster_type.source_type().as_str().to_string())
                .or_insert(0) += 1;
            *by_tier.entry(record.severity_tier).or_insert(0) += 1;

            if record.unclassified {
                unclassified_count += 1;
            } else if record.disaster_type == DisasterType::Earthquake {
                magnitudes.push(record.severity_score);
            }
        }

        let avg_earthquake_magnitude = if magnitudes.is_empty() {
            None
        } else {
            Some(magnitudes.iter().sum::<f64>() / magnitudes.len() as f64)
        };

        Self {
            region: None,
            total_disasters: disasters.len(),
            severe_count: disasters
                .iter()
                .filter(|d| d.severity_tier >= SeverityTier::High)
                .count(),
            severe_earthquake_count: disasters
                .iter()
                .filter(|d| {
                    d.disaster_type == DisasterType::Earthquake
                        && d.severity_tier >= SeverityTier::High
                })
                .count(),
            by_type,
            by_tier,
            unclassified_count,
            avg_earthquake_magnitude,
            relief_centers: centers.len(),
            relief_capacity_total: centers.iter().map(|c| u64::from(c.capacity_total)).sum(),
            relief_capacity_occupied: centers
                .iter()
                .map(|c| u64::from(c.capacity_occupied))
                .sum(),
            relief_inconsistent: centers.iter().filter(|c| c.occupancy_inconsistent).count(),
            oldest_snapshot: None,
            as_of: BTreeMap::new(),
        }
    }
}
