//! Data models for the disaster feed.
//!
//! # Unified Schema
//!
//! Every source adapter emits its own native payload, but everything that reaches
//! the snapshot store has one of two shapes:
//!
//! - [`DisasterRecord`]: an earthquake, wildfire or weather alert with a derived
//!   severity tier and score
//! - [`ReliefCenterRecord`]: a shelter/relief site with capacity and resources
//!
//! Records are immutable once stored. Corrections only ever arrive through the next
//! full refresh of their source type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_sources::FetchError;
use crate::normalize::RejectCounts;

/// One of the four independently refreshed feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Seismic events.
    Earthquake,
    /// Active fire incidents.
    Wildfire,
    /// Active weather warnings and watches.
    WeatherAlert,
    /// Relief center capacity and resources.
    ReliefCenter,
}

impl SourceType {
    /// All source types, in display order.
    pub const ALL: [SourceType; 4] = [
        SourceType::Earthquake,
        SourceType::Wildfire,
        SourceType::WeatherAlert,
        SourceType::ReliefCenter,
    ];

    /// Get the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Earthquake => "earthquake",
            SourceType::Wildfire => "wildfire",
            SourceType::WeatherAlert => "weather_alert",
            SourceType::ReliefCenter => "relief_center",
        }
    }

    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::Earthquake => "Earthquakes",
            SourceType::Wildfire => "Wildfires",
            SourceType::WeatherAlert => "Weather Alerts",
            SourceType::ReliefCenter => "Relief Centers",
        }
    }

    /// The disaster type carried by this source, if it carries disasters at all.
    pub fn disaster_type(&self) -> Option<DisasterType> {
        match self {
            SourceType::Earthquake => Some(DisasterType::Earthquake),
            SourceType::Wildfire => Some(DisasterType::Wildfire),
            SourceType::WeatherAlert => Some(DisasterType::WeatherAlert),
            SourceType::ReliefCenter => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a source type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source type '{0}'")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earthquake" | "earthquakes" | "seismic" => Ok(SourceType::Earthquake),
            "wildfire" | "wildfires" | "fire" => Ok(SourceType::Wildfire),
            "weather_alert" | "weather_alerts" | "weather-alerts" | "weather" => {
                Ok(SourceType::WeatherAlert)
            }
            "relief_center" | "relief_centers" | "relief-centers" | "relief" => {
                Ok(SourceType::ReliefCenter)
            }
            _ => Err(UnknownSourceType(s.to_string())),
        }
    }
}

/// The kind of disaster a [`DisasterRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterType {
    Earthquake,
    Wildfire,
    WeatherAlert,
}

impl DisasterType {
    /// The feed this disaster type is fetched from.
    pub fn source_type(&self) -> SourceType {
        match self {
            DisasterType::Earthquake => SourceType::Earthquake,
            DisasterType::Wildfire => SourceType::Wildfire,
            DisasterType::WeatherAlert => SourceType::WeatherAlert,
        }
    }
}

/// Coarse severity classification, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityTier {
    /// All tiers, lowest first.
    pub const ALL: [SeverityTier; 4] = [
        SeverityTier::Low,
        SeverityTier::Moderate,
        SeverityTier::High,
        SeverityTier::Critical,
    ];
}

/// The source-native value a severity is derived from.
///
/// Fields are optional because sources omit them; the classifier maps a missing
/// value to an unclassified `Low` rather than rejecting the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSeverity {
    /// Earthquake magnitude.
    Magnitude { value: Option<f64> },

    /// Fire size and containment.
    FireExtent {
        /// Estimated affected area in acres.
        area_acres: Option<f64>,
        /// Containment, 0-100.
        containment_percent: Option<f64>,
    },

    /// Categorical alert severity as reported by the source (e.g. "Severe").
    AlertLevel { level: Option<String> },
}

/// A normalized, classified disaster event.
///
/// Only the severity classifier builds these, so `severity_tier` and
/// `severity_score` always agree with `magnitude_or_severity_raw`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct DisasterRecord {
    /// Source-qualified identifier (e.g. "usgs:us7000abcd"), unique within its type.
    pub id: String,

    /// Kind of disaster.
    #[serde(rename = "type")]
    pub disaster_type: DisasterType,

    /// Short display title.
    pub title: String,

    /// Latitude in degrees, -90..=90.
    pub latitude: f64,

    /// Longitude in degrees, -180..=180.
    pub longitude: f64,

    /// Event time as reported by the source (UTC).
    pub timestamp: DateTime<Utc>,

    /// Source-native severity input.
    pub magnitude_or_severity_raw: RawSeverity,

    /// Derived tier.
    pub severity_tier: SeverityTier,

    /// Derived score, monotonic with tier within a disaster type.
    pub severity_score: f64,

    /// True when the raw value was missing or out of range and the tier defaulted to Low.
    pub unclassified: bool,

    /// Earthquakes only: tier of the magnitude weighted by hypocentre depth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<SeverityTier>,

    /// Configured regions whose bounding box contains the event.
    pub region_tags: BTreeSet<String>,

    /// Hypocentre depth for earthquakes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_km: Option<f64>,

    /// Link to the source's detail page, when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the feed the record came from.
    pub source_name: String,

    /// When the fetch that produced this record completed.
    pub retrieved_at: DateTime<Utc>,
}

impl DisasterRecord {
    /// Whether the record carries the given region tag (case-insensitive).
    pub fn in_region(&self, region: &str) -> bool {
        self.region_tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(region))
    }
}

/// A normalized relief center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliefCenterRecord {
    /// Source-qualified identifier (e.g. "relief:dubai-erc").
    pub id: String,

    /// Display name.
    pub name: String,

    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// Total capacity (people).
    pub capacity_total: u32,

    /// Current occupancy, clamped to `capacity_total`.
    pub capacity_occupied: u32,

    /// `capacity_occupied / capacity_total`, or 0 when total is 0.
    pub occupancy_rate: f64,

    /// Set when the source reported more occupants than capacity.
    pub occupancy_inconsistent: bool,

    /// Resource name to available quantity.
    pub resources: BTreeMap<String, u32>,

    /// Phone number or other contact detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,

    /// Configured regions whose bounding box contains the center.
    pub region_tags: BTreeSet<String>,

    /// Name of the feed the record came from.
    pub source_name: String,

    /// When the fetch that produced this record completed.
    pub retrieved_at: DateTime<Utc>,
}

impl ReliefCenterRecord {
    /// Whether the record carries the given region tag (case-insensitive).
    pub fn in_region(&self, region: &str) -> bool {
        self.region_tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(region))
    }
}

/// Coarse classification of an adapter-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    HttpError,
    MalformedPayload,
    RateLimited,
    /// DNS, TLS or connect failure before any HTTP status was received.
    Connection,
}

/// Counts from the last successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Records stored.
    pub stored: usize,

    /// Features the adapter could not parse.
    pub skipped: usize,

    /// Features outside the configured window or threshold.
    pub filtered: usize,

    /// Records dropped during normalization.
    pub rejected: usize,

    /// `rejected`, broken down by reason.
    pub rejects: RejectCounts,
}

/// Fetch health of one source type.
///
/// `consecutive_failures` is advisory only; it never throttles the schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    /// The feed this entry describes.
    pub source_type: SourceType,

    /// Name of the upstream service.
    pub source_name: String,

    /// Completion time of the last successful cycle.
    pub last_success_at: Option<DateTime<Utc>>,

    /// Completion time of the last failed cycle.
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Failures since the last success.
    pub consecutive_failures: u32,

    /// Kind of the most recent failure.
    pub last_error_kind: Option<ErrorKind>,

    /// HTTP status of the most recent failure, when it was an HTTP error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_status: Option<u16>,

    /// Message of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,

    /// Counts from the last successful cycle.
    pub last_batch: Option<BatchStats>,
}

impl SourceHealth {
    /// Health for a source that has not completed a cycle yet.
    pub fn new(source_type: SourceType, source_name: &str) -> Self {
        Self {
            source_type,
            source_name: source_name.to_string(),
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            last_error_kind: None,
            last_error_status: None,
            last_error_message: None,
            last_batch: None,
        }
    }

    /// A copy of this health entry updated for a successful cycle.
    ///
    /// The last error is kept for display; only the failure streak resets.
    pub fn succeeded(&self, at: DateTime<Utc>, stats: BatchStats) -> Self {
        Self {
            last_success_at: Some(at),
            consecutive_failures: 0,
            last_batch: Some(stats),
            ..self.clone()
        }
    }

    /// A copy of this health entry updated for a failed cycle.
    pub fn failed(&self, at: DateTime<Utc>, error: &FetchError) -> Self {
        Self {
            last_failure_at: Some(at),
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            last_error_kind: Some(error.kind()),
            last_error_status: error.status(),
            last_error_message: Some(error.to_string()),
            ..self.clone()
        }
    }
}
