//! NIFC WFIGS wildfire incident client.
//!
//! The Wildland Fire Interagency Geospatial Services (WFIGS) current incident
//! locations layer is an ArcGIS FeatureServer; the `query` endpoint returns GeoJSON
//! when asked with `f=geojson`.
//!
//! # API Reference
//!
//! See: <https://data-nifc.opendata.arcgis.com/datasets/nifc::wfigs-current-incident-locations>

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::geojson::Geometry;
use super::{
    FetchBatch, FetchError, RawRecord, SourceAdapter, build_http_client, get_features,
    parse_features,
};
use crate::config::SourceConfig;
use crate::model::SourceType;

/// WFIGS current incident locations layer.
const WFIGS_API_BASE: &str = "https://services3.arcgis.com/T4QMspbfLg3qTGWY/arcgis/rest/services/WFIGS_Incident_Locations_Current/FeatureServer/0";

/// Attributes requested from the layer.
const OUT_FIELDS: &str =
    "UniqueFireIdentifier,IncidentName,IncidentSize,PercentContained,FireDiscoveryDateTime";

/// Client for the WFIGS incident feature service.
#[derive(Clone)]
pub struct WfigsClient {
    client: reqwest::Client,
    base_url: String,
    min_area_acres: f64,
    window: Duration,
    max_records: u32,
}

impl WfigsClient {
    /// Create a client from the wildfire source configuration.
    pub fn new(config: &SourceConfig) -> reqwest::Result<Self> {
        let base_url = if config.base_url.is_empty() {
            WFIGS_API_BASE
        } else {
            config.base_url.trim_end_matches('/')
        };

        Ok(Self {
            client: build_http_client(config.timeout(), config.user_agent.as_deref())?,
            base_url: base_url.to_string(),
            min_area_acres: config.min_area_acres.unwrap_or(0.0),
            window: Duration::hours(i64::from(config.window_hours)),
            max_records: config.max_records,
        })
    }

    /// ArcGIS `where` clause for the configured size threshold.
    fn where_clause(&self) -> String {
        if self.min_area_acres > 0.0 {
            format!("IncidentSize >= {}", self.min_area_acres)
        } else {
            "1=1".to_string()
        }
    }

    fn query_url(&self) -> String {
        format!(
            "{}/query?where={}&outFields={}&f=geojson&resultRecordCount={}&orderByFields={}",
            self.base_url,
            urlencoding::encode(&self.where_clause()),
            urlencoding::encode(OUT_FIELDS),
            self.max_records,
            urlencoding::encode("FireDiscoveryDateTime DESC")
        )
    }

    /// Fetch current incidents.
    pub async fn get_incidents(&self) -> Result<(Vec<WfigsIncident>, usize), FetchError> {
        let features = get_features(&self.client, &self.query_url()).await?;
        Ok(parse_features("wfigs", features))
    }
}

#[async_trait]
impl SourceAdapter for WfigsClient {
    fn source_type(&self) -> SourceType {
        SourceType::Wildfire
    }

    fn source_name(&self) -> &str {
        "wfigs"
    }

    async fn fetch(&self) -> Result<FetchBatch, FetchError> {
        let (incidents, skipped) = self.get_incidents().await?;
        let cutoff = Utc::now() - self.window;

        let total = incidents.len();
        let records: Vec<RawRecord> = incidents
            .into_iter()
            .filter(|i| i.passes(self.min_area_acres, cutoff))
            .take(self.max_records as usize)
            .map(RawRecord::Wildfire)
            .collect();

        Ok(FetchBatch {
            filtered: total - records.len(),
            records,
            skipped,
        })
    }
}

// ============================================================================
// Response types
// ============================================================================

/// A single incident feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfigsIncident {
    /// Incident attributes.
    pub properties: WfigsProperties,

    /// Point location of the incident.
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// WFIGS incident attributes (ArcGIS field names).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WfigsProperties {
    /// Stable incident identifier (e.g. "2024-CAKNF-000123").
    #[serde(default)]
    pub unique_fire_identifier: Option<String>,

    /// Incident name.
    #[serde(default)]
    pub incident_name: Option<String>,

    /// Burned area in acres.
    #[serde(default)]
    pub incident_size: Option<f64>,

    /// Containment percentage, 0-100.
    #[serde(default)]
    pub percent_contained: Option<f64>,

    /// Discovery time in milliseconds since the epoch.
    #[serde(default)]
    pub fire_discovery_date_time: Option<i64>,
}

impl WfigsIncident {
    /// Discovery time as a DateTime.
    pub fn discovered_at(&self) -> Option<DateTime<Utc>> {
        self.properties
            .fire_discovery_date_time
            .and_then(DateTime::from_timestamp_millis)
    }

    /// Whether the incident is recent enough and large enough.
    ///
    /// Incidents with an unknown size are kept and classified as unclassified later.
    pub fn passes(&self, min_area_acres: f64, cutoff: DateTime<Utc>) -> bool {
        let size_ok = self
            .properties
            .incident_size
            .is_none_or(|size| size >= min_area_acres);
        let time_ok = self.discovered_at().is_none_or(|t| t >= cutoff);
        size_ok && time_ok
    }
}
