//! Normalization of source-native records into the unified schema.
//!
//! Normalization is pure: it maps fields, derives region tags from coordinates and
//! stamps `retrieved_at`. A record without usable coordinates, timestamp or id is
//! rejected whole; nothing is stored partially populated.
//!
//! Severity is not computed here. Disaster records leave this module as
//! [`NormalizedDisaster`] and become [`DisasterRecord`](crate::model::DisasterRecord)
//! only through the severity classifier.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::data_sources::{NwsAlert, RawRecord, ReliefCenterFeature, UsgsEvent, WfigsIncident};
use crate::model::{DisasterType, RawSeverity, ReliefCenterRecord};
use crate::region::RegionIndex;

/// Why a raw record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("record has no usable coordinates")]
    MissingCoordinates,

    #[error("coordinates out of range")]
    InvalidCoordinates,

    #[error("missing or unparseable timestamp")]
    InvalidTimestamp,

    #[error("duplicate id within batch")]
    DuplicateId,

    #[error("record has no id")]
    MissingId,
}

/// Per-reason reject counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RejectCounts(BTreeMap<RejectReason, usize>);

impl RejectCounts {
    pub fn record(&mut self, reason: RejectReason) {
        *self.0.entry(reason).or_insert(0) += 1;
    }

    pub fn get(&self, reason: RejectReason) -> usize {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}

/// A disaster record that has been normalized but not yet classified.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDisaster {
    pub id: String,
    pub disaster_type: DisasterType,
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub raw: RawSeverity,
    pub region_tags: BTreeSet<String>,
    pub depth_km: Option<f64>,
    pub url: Option<String>,
    pub source_name: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Output of normalizing one fetch batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub disasters: Vec<NormalizedDisaster>,
    pub relief_centers: Vec<ReliefCenterRecord>,
    pub rejects: RejectCounts,
}

/// Fields shared by every normalizer.
struct Context<'a> {
    regions: &'a RegionIndex,
    retrieved_at: DateTime<Utc>,
    source_name: &'a str,
}

/// Normalize a whole batch. The first occurrence of an id wins; later ones are counted
/// as duplicates and dropped.
pub fn normalize_batch(
    records: Vec<RawRecord>,
    regions: &RegionIndex,
    retrieved_at: DateTime<Utc>,
    source_name: &str,
) -> NormalizedBatch {
    let ctx = Context {
        regions,
        retrieved_at,
        source_name,
    };
    let mut batch = NormalizedBatch::default();
    let mut seen = HashSet::new();

    for record in records {
        let normalized = match record {
            RawRecord::Earthquake(event) => {
                normalize_earthquake(&event, &ctx).map(Normalized::Disaster)
            }
            RawRecord::Wildfire(incident) => {
                normalize_wildfire(&incident, &ctx).map(Normalized::Disaster)
            }
            RawRecord::WeatherAlert(alert) => {
                normalize_weather_alert(&alert, &ctx).map(Normalized::Disaster)
            }
            RawRecord::ReliefCenter(center) => {
                normalize_relief_center(&center, &ctx).map(Normalized::ReliefCenter)
            }
        };

        match normalized {
            Ok(record) if !seen.insert(record.id().to_string()) => {
                batch.rejects.record(RejectReason::DuplicateId);
            }
            Ok(Normalized::Disaster(disaster)) => batch.disasters.push(disaster),
            Ok(Normalized::ReliefCenter(center)) => batch.relief_centers.push(center),
            Err(reason) => batch.rejects.record(reason),
        }
    }

    batch
}

enum Normalized {
    Disaster(NormalizedDisaster),
    ReliefCenter(ReliefCenterRecord),
}

impl Normalized {
    fn id(&self) -> &str {
        match self {
            Normalized::Disaster(d) => &d.id,
            Normalized::ReliefCenter(c) => &c.id,
        }
    }
}

fn qualified_id(prefix: &str, id: Option<&str>) -> Result<String, RejectReason> {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(format!("{prefix}:{id}")),
        _ => Err(RejectReason::MissingId),
    }
}

fn checked_point(point: Option<(f64, f64)>) -> Result<(f64, f64), RejectReason> {
    let (lat, lon) = point.ok_or(RejectReason::MissingCoordinates)?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok((lat, lon))
    } else {
        Err(RejectReason::InvalidCoordinates)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_rfc3339(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn normalize_earthquake(
    event: &UsgsEvent,
    ctx: &Context<'_>,
) -> Result<NormalizedDisaster, RejectReason> {
    let id = qualified_id("usgs", event.id.as_deref())?;
    let geometry = event.geometry.as_ref();
    let (latitude, longitude) = checked_point(geometry.and_then(|g| g.representative_point()))?;
    let timestamp = event.event_time().ok_or(RejectReason::InvalidTimestamp)?;
    let props = &event.properties;

    let title = non_empty(props.title.as_deref())
        .or(non_empty(props.place.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| "Earthquake".to_string());

    Ok(NormalizedDisaster {
        id,
        disaster_type: DisasterType::Earthquake,
        title,
        latitude,
        longitude,
        timestamp,
        raw: RawSeverity::Magnitude { value: props.mag },
        region_tags: ctx.regions.tags_for(latitude, longitude),
        depth_km: geometry.and_then(|g| g.altitude()),
        url: props.url.clone(),
        source_name: ctx.source_name.to_string(),
        retrieved_at: ctx.retrieved_at,
    })
}

fn normalize_wildfire(
    incident: &WfigsIncident,
    ctx: &Context<'_>,
) -> Result<NormalizedDisaster, RejectReason> {
    let props = &incident.properties;
    let id = qualified_id("wfigs", props.unique_fire_identifier.as_deref())?;
    let (latitude, longitude) = checked_point(
        incident
            .geometry
            .as_ref()
            .and_then(|g| g.representative_point()),
    )?;
    let timestamp = incident.discovered_at().ok_or(RejectReason::InvalidTimestamp)?;

    let title = non_empty(props.incident_name.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| "Wildfire".to_string());

    Ok(NormalizedDisaster {
        id,
        disaster_type: DisasterType::Wildfire,
        title,
        latitude,
        longitude,
        timestamp,
        raw: RawSeverity::FireExtent {
            area_acres: props.incident_size,
            containment_percent: props.percent_contained,
        },
        region_tags: ctx.regions.tags_for(latitude, longitude),
        depth_km: None,
        url: None,
        source_name: ctx.source_name.to_string(),
        retrieved_at: ctx.retrieved_at,
    })
}

fn normalize_weather_alert(
    alert: &NwsAlert,
    ctx: &Context<'_>,
) -> Result<NormalizedDisaster, RejectReason> {
    let props = &alert.properties;
    let id = qualified_id("nws", props.id.as_deref())?;
    let (latitude, longitude) = checked_point(
        alert
            .geometry
            .as_ref()
            .and_then(|g| g.representative_point()),
    )?;
    let timestamp = parse_rfc3339(props.onset.as_deref())
        .or_else(|| parse_rfc3339(props.sent.as_deref()))
        .ok_or(RejectReason::InvalidTimestamp)?;

    let title = non_empty(props.headline.as_deref())
        .or(non_empty(props.event.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| "Weather Alert".to_string());

    Ok(NormalizedDisaster {
        id,
        disaster_type: DisasterType::WeatherAlert,
        title,
        latitude,
        longitude,
        timestamp,
        raw: RawSeverity::AlertLevel {
            level: props.severity.clone(),
        },
        region_tags: ctx.regions.tags_for(latitude, longitude),
        depth_km: None,
        url: props.link.clone(),
        source_name: ctx.source_name.to_string(),
        retrieved_at: ctx.retrieved_at,
    })
}

fn normalize_relief_center(
    feature: &ReliefCenterFeature,
    ctx: &Context<'_>,
) -> Result<ReliefCenterRecord, RejectReason> {
    let props = &feature.properties;
    let id = qualified_id("relief", props.id.as_deref())?;
    let (latitude, longitude) = checked_point(
        feature
            .geometry
            .as_ref()
            .and_then(|g| g.representative_point()),
    )?;

    let capacity_total = props.capacity.unwrap_or(0);
    let reported_occupied = props.current_occupancy.unwrap_or(0);
    let occupancy_inconsistent = reported_occupied > capacity_total;
    let capacity_occupied = reported_occupied.min(capacity_total);
    let occupancy_rate = if capacity_total == 0 {
        0.0
    } else {
        f64::from(capacity_occupied) / f64::from(capacity_total)
    };

    let name = non_empty(props.name.as_deref())
        .or(props.id.as_deref())
        .unwrap_or_default()
        .to_string();

    Ok(ReliefCenterRecord {
        id,
        name,
        latitude,
        longitude,
        capacity_total,
        capacity_occupied,
        occupancy_rate,
        occupancy_inconsistent,
        resources: props
            .resources
            .as_ref()
            .map(|r| r.to_quantities())
            .unwrap_or_default(),
        contact_info: props.contact.clone(),
        region_tags: ctx.regions.tags_for(latitude, longitude),
        source_name: ctx.source_name.to_string(),
        retrieved_at: ctx.retrieved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sources::geojson::Geometry;
    use crate::data_sources::nws::NwsAlertProperties;
    use crate::data_sources::relief_centers::{ReliefCenterProperties, Resources};
    use crate::data_sources::usgs::UsgsProperties;
    use crate::region::RegionDefinition;

    fn regions() -> RegionIndex {
        RegionIndex::new(vec![
            RegionDefinition {
                name: "UAE".to_string(),
                code: Some("AE".to_string()),
                min_lat: 22.5,
                max_lat: 26.5,
                min_lon: 51.0,
                max_lon: 56.5,
            },
            RegionDefinition {
                name: "Canada".to_string(),
                code: Some("CA".to_string()),
                min_lat: 41.0,
                max_lat: 84.0,
                min_lon: -141.0,
                max_lon: -52.0,
            },
        ])
    }

    fn quake(id: &str, coordinates: Option<Vec<f64>>) -> RawRecord {
        RawRecord::Earthquake(UsgsEvent {
            id: Some(id.to_string()),
            properties: UsgsProperties {
                mag: Some(4.5),
                time: Some(1_701_500_000_000),
                place: Some("near Dubai".to_string()),
                ..Default::default()
            },
            geometry: coordinates.map(|coordinates| Geometry::Point { coordinates }),
        })
    }

    fn center(capacity: u32, occupancy: u32) -> RawRecord {
        RawRecord::ReliefCenter(ReliefCenterFeature {
            properties: ReliefCenterProperties {
                id: Some("ottawa-emc".to_string()),
                name: Some("Ottawa Emergency Management Centre".to_string()),
                capacity: Some(capacity),
                current_occupancy: Some(occupancy),
                resources: Some(Resources::Names(vec!["Food".to_string()])),
                contact: None,
            },
            geometry: Some(Geometry::Point {
                coordinates: vec![-75.6972, 45.4215],
            }),
        })
    }

    #[test]
    fn test_earthquake_fields_and_region_tags() {
        let now = Utc::now();
        let batch = normalize_batch(
            vec![quake("us1", Some(vec![55.27, 25.2, 10.0]))],
            &regions(),
            now,
            "usgs",
        );

        let record = &batch.disasters[0];
        assert_eq!(record.id, "usgs:us1");
        assert_eq!(record.latitude, 25.2);
        assert_eq!(record.longitude, 55.27);
        assert_eq!(record.depth_km, Some(10.0));
        assert_eq!(record.title, "near Dubai");
        assert_eq!(record.retrieved_at, now);
        assert!(record.region_tags.contains("UAE"));
        assert_eq!(record.region_tags.len(), 1);
    }

    #[test]
    fn test_missing_coordinates_rejected() {
        let batch = normalize_batch(
            vec![quake("us1", None), quake("us2", Some(vec![55.0]))],
            &regions(),
            Utc::now(),
            "usgs",
        );

        assert!(batch.disasters.is_empty());
        assert_eq!(batch.rejects.get(RejectReason::MissingCoordinates), 2);
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let batch = normalize_batch(
            vec![quake("us1", Some(vec![200.0, 95.0]))],
            &regions(),
            Utc::now(),
            "usgs",
        );

        assert_eq!(batch.rejects.get(RejectReason::InvalidCoordinates), 1);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let batch = normalize_batch(
            vec![
                quake("us1", Some(vec![55.0, 25.0])),
                quake("us1", Some(vec![-75.0, 45.0])),
                quake("us2", Some(vec![-75.0, 45.0])),
            ],
            &regions(),
            Utc::now(),
            "usgs",
        );

        assert_eq!(batch.disasters.len(), 2);
        assert_eq!(batch.disasters[0].longitude, 55.0);
        assert_eq!(batch.rejects.get(RejectReason::DuplicateId), 1);
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let mut record = quake("us1", Some(vec![55.0, 25.0]));
        if let RawRecord::Earthquake(event) = &mut record {
            event.properties.time = None;
        }

        let batch = normalize_batch(vec![record], &regions(), Utc::now(), "usgs");
        assert_eq!(batch.rejects.get(RejectReason::InvalidTimestamp), 1);
        assert_eq!(batch.rejects.total(), 1);
    }

    #[test]
    fn test_alert_with_unparseable_time_rejected() {
        let alert = RawRecord::WeatherAlert(NwsAlert {
            properties: NwsAlertProperties {
                id: Some("urn:1".to_string()),
                sent: Some("yesterday".to_string()),
                ..Default::default()
            },
            geometry: Some(Geometry::Point {
                coordinates: vec![-75.0, 45.0],
            }),
        });

        let batch = normalize_batch(vec![alert], &regions(), Utc::now(), "nws");
        assert_eq!(batch.rejects.get(RejectReason::InvalidTimestamp), 1);
    }

    #[test]
    fn test_relief_occupancy_clamped() {
        let batch = normalize_batch(vec![center(100, 140)], &regions(), Utc::now(), "bundled");
        let record = &batch.relief_centers[0];

        assert_eq!(record.id, "relief:ottawa-emc");
        assert_eq!(record.capacity_occupied, 100);
        assert_eq!(record.occupancy_rate, 1.0);
        assert!(record.occupancy_inconsistent);
        assert!(record.region_tags.contains("Canada"));
        assert_eq!(record.resources.get("Food"), Some(&1));
    }

    #[test]
    fn test_relief_zero_capacity_rate_is_zero() {
        let batch = normalize_batch(vec![center(0, 0)], &regions(), Utc::now(), "bundled");
        let record = &batch.relief_centers[0];

        assert_eq!(record.occupancy_rate, 0.0);
        assert!(!record.occupancy_inconsistent);
    }

    #[test]
    fn test_missing_id_rejected() {
        let mut record = quake("  ", Some(vec![55.0, 25.0]));
        if let RawRecord::Earthquake(event) = &mut record {
            event.id = Some("  ".to_string());
        }

        let batch = normalize_batch(vec![record], &regions(), Utc::now(), "usgs");
        assert_eq!(batch.rejects.get(RejectReason::MissingId), 1);
    }
}
