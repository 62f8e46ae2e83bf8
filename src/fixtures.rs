//! Record builders shared by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::data_sources::geojson::Geometry;
use crate::data_sources::nws::NwsAlertProperties;
use crate::data_sources::usgs::UsgsProperties;
use crate::data_sources::{FetchBatch, FetchError, NwsAlert, RawRecord, SourceAdapter, UsgsEvent};
use crate::model::{DisasterRecord, DisasterType, RawSeverity, ReliefCenterRecord, SourceType};
use crate::normalize::NormalizedDisaster;
use crate::severity::{SeverityClassifier, TierThresholds};

fn classified(
    id: &str,
    disaster_type: DisasterType,
    raw: RawSeverity,
    timestamp: DateTime<Utc>,
    tags: &[&str],
) -> DisasterRecord {
    SeverityClassifier::new(TierThresholds::default(), None).apply(NormalizedDisaster {
        id: id.to_string(),
        disaster_type,
        title: id.to_string(),
        latitude: 0.0,
        longitude: 0.0,
        timestamp,
        raw,
        region_tags: tags.iter().map(|t| t.to_string()).collect(),
        depth_km: None,
        url: None,
        source_name: "test".to_string(),
        retrieved_at: timestamp,
    })
}

/// An earthquake whose severity score is its magnitude.
pub fn quake(id: &str, magnitude: f64, timestamp: DateTime<Utc>, tags: &[&str]) -> DisasterRecord {
    classified(
        id,
        DisasterType::Earthquake,
        RawSeverity::Magnitude {
            value: Some(magnitude),
        },
        timestamp,
        tags,
    )
}

/// A weather alert with a CAP severity word.
pub fn alert(id: &str, level: &str, timestamp: DateTime<Utc>, tags: &[&str]) -> DisasterRecord {
    classified(
        id,
        DisasterType::WeatherAlert,
        RawSeverity::AlertLevel {
            level: Some(level.to_string()),
        },
        timestamp,
        tags,
    )
}

/// A relief center with the given occupancy.
pub fn relief_center(id: &str, total: u32, occupied: u32, tags: &[&str]) -> ReliefCenterRecord {
    ReliefCenterRecord {
        id: id.to_string(),
        name: id.to_string(),
        latitude: 0.0,
        longitude: 0.0,
        capacity_total: total,
        capacity_occupied: occupied,
        occupancy_rate: if total == 0 {
            0.0
        } else {
            f64::from(occupied) / f64::from(total)
        },
        occupancy_inconsistent: false,
        resources: BTreeMap::from([("Food".to_string(), 1)]),
        contact_info: None,
        region_tags: tags.iter().map(|t| t.to_string()).collect(),
        source_name: "test".to_string(),
        retrieved_at: Utc::now(),
    }
}

/// A raw USGS event at (`lat`, `lon`), or without geometry when `position` is `None`.
pub fn usgs_event(id: &str, magnitude: f64, position: Option<(f64, f64)>) -> RawRecord {
    RawRecord::Earthquake(UsgsEvent {
        id: Some(id.to_string()),
        properties: UsgsProperties {
            mag: Some(magnitude),
            time: Some(Utc::now().timestamp_millis()),
            ..Default::default()
        },
        geometry: position.map(|(lat, lon)| Geometry::Point {
            coordinates: vec![lon, lat],
        }),
    })
}

/// A raw NWS alert at (`lat`, `lon`).
pub fn nws_alert(id: &str, severity: &str, lat: f64, lon: f64) -> RawRecord {
    RawRecord::WeatherAlert(NwsAlert {
        properties: NwsAlertProperties {
            id: Some(id.to_string()),
            severity: Some(severity.to_string()),
            sent: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        },
        geometry: Some(Geometry::Point {
            coordinates: vec![lon, lat],
        }),
    })
}

/// Adapter returning a fixed response, optionally blocking until released.
pub struct ScriptedAdapter {
    source_type: SourceType,
    response: Mutex<Result<FetchBatch, FetchError>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedAdapter {
    pub fn ok(source_type: SourceType, records: Vec<RawRecord>) -> Self {
        Self {
            source_type,
            response: Mutex::new(Ok(FetchBatch {
                records,
                ..Default::default()
            })),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing(source_type: SourceType, error: FetchError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            ..Self::ok(source_type, Vec::new())
        }
    }

    /// Block every fetch until `gate` is notified.
    pub fn gated(self, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..self
        }
    }

    pub fn set_response(&self, response: Result<FetchBatch, FetchError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn source_name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> Result<FetchBatch, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.response.lock().unwrap().clone()
    }
}
