//! USGS earthquake catalog client.
//!
//! The USGS FDSN event web service returns recent seismic events as GeoJSON,
//! filterable by start time and minimum magnitude.
//!
//! # API Reference
//!
//! See: <https://earthquake.usgs.gov/fdsnws/event/1/>
//!
//! # Filtering
//!
//! The query asks the server for events above `min_magnitude` within `window_hours`,
//! and the same bounds are re-applied locally so a server that ignores a parameter
//! cannot inflate the batch.

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

/// Base URL for the USGS FDSN event service.
const USGS_API_BASE: &str = "https://earthquake.usgs.gov/fdsnws/event/1";

/// Default minimum magnitude when none is configured.
const DEFAULT_MIN_MAGNITUDE: f64 = 2.5;

/// Client for querying the USGS earthquake catalog.
#[derive(Clone)]
pub struct UsgsClient {
    client: reqwest::Client,
    base_url: String,
    min_magnitude: f64,
    window: Duration,
    max_records: u32,
}

impl UsgsClient {
    /// Create a client from the earthquake source configuration.
    pub fn new(config: &SourceConfig) -> reqwest::Result<Self> {
        let base_url = if config.base_url.is_empty() {
            USGS_API_BASE
        } else {
            config.base_url.trim_end_matches('/')
        };

        Ok(Self {
            client: build_http_client(config.timeout(), config.user_agent.as_deref())?,
            base_url: base_url.to_string(),
            min_magnitude: config.min_magnitude.unwrap_or(DEFAULT_MIN_MAGNITUDE),
            window: Duration::hours(i64::from(config.window_hours)),
            max_records: config.max_records,
        })
    }

    /// Build the event query URL for events since `start`.
    fn query_url(&self, start: DateTime<Utc>) -> String {
        format!(
            "{}/query?format=geojson&starttime={}&minmagnitude={}&limit={}&orderby=time",
            self.base_url,
            urlencoding::encode(&start.format("%Y-%m-%dT%H:%M:%S").to_string()),
            self.min_magnitude,
            self.max_records
        )
    }

    /// Fetch events within the configured window.
    ///
    /// Returns the parsed events and the number of features that failed to parse.
    pub async fn get_recent_events(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Vec<UsgsEvent>, usize), FetchError> {
        let url = self.query_url(now - self.window);
        let features = get_features(&self.client, &url).await?;
        Ok(parse_features("usgs", features))
    }
}

#[async_trait]
impl SourceAdapter for UsgsClient {
    fn source_type(&self) -> SourceType {
        SourceType::Earthquake
    }

    fn source_name(&self) -> &str {
        "usgs"
    }

    async fn fetch(&self) -> Result<FetchBatch, FetchError> {
        let now = Utc::now();
        let (events, skipped) = self.get_recent_events(now).await?;
        let cutoff = now - self.window;

        let total = events.len();
        let records: Vec<RawRecord> = events
            .into_iter()
            .filter(|e| e.passes(self.min_magnitude, cutoff))
            .take(self.max_records as usize)
            .map(RawRecord::Earthquake)
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

/// A single event feature from the USGS GeoJSON feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsgsEvent {
    /// Catalog event ID (e.g. "us7000abcd").
    #[serde(default)]
    pub id: Option<String>,

    /// Event properties.
    pub properties: UsgsProperties,

    /// Point geometry: `[longitude, latitude, depth_km]`.
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Properties of a USGS event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsgsProperties {
    /// Magnitude.
    #[serde(default)]
    pub mag: Option<f64>,

    /// Magnitude type (e.g. "ml", "mb", "mww").
    #[serde(default, rename = "magType")]
    pub mag_type: Option<String>,

    /// Human-readable location (e.g. "10 km SSW of Idyllwild, CA").
    #[serde(default)]
    pub place: Option<String>,

    /// Origin time in milliseconds since the epoch.
    #[serde(default)]
    pub time: Option<i64>,

    /// Event page URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Feed-provided title (e.g. "M 4.6 - 10 km SSW of Idyllwild, CA").
    #[serde(default)]
    pub title: Option<String>,

    /// Review status ("automatic" or "reviewed").
    #[serde(default)]
    pub status: Option<String>,

    /// Event type (usually "earthquake"; also "quarry blast", "explosion").
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

impl UsgsEvent {
    /// Origin time as a DateTime.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.properties
            .time
            .and_then(DateTime::from_timestamp_millis)
    }

    /// Whether the event is inside the magnitude threshold and time window.
    ///
    /// Events missing either value are kept; normalization decides what to do with them.
    pub fn passes(&self, min_magnitude: f64, cutoff: DateTime<Utc>) -> bool {
        let magnitude_ok = self.properties.mag.is_none_or(|m| m >= min_magnitude);
        let time_ok = self.event_time().is_none_or(|t| t >= cutoff);
        magnitude_ok && time_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SourceConfig {
        SourceConfig {
            base_url: base_url.to_string(),
            timeout_secs: 1,
            window_hours: 24,
            max_records: 100,
            min_magnitude: Some(2.5),
            ..SourceConfig::default()
        }
    }

    fn feature(id: &str, mag: f64, minutes_ago: i64) -> serde_json::Value {
        let time = (Utc::now() - Duration::minutes(minutes_ago)).timestamp_millis();
        json!({
            "type": "Feature",
            "id": id,
            "properties": { "mag": mag, "place": "Somewhere", "time": time, "title": format!("M {mag}") },
            "geometry": { "type": "Point", "coordinates": [-117.5, 33.7, 12.3] }
        })
    }

    #[test]
    fn test_event_filtering() {
        let now = Utc::now();
        let event = UsgsEvent {
            id: Some("ci1".to_string()),
            properties: UsgsProperties {
                mag: Some(3.0),
                time: Some((now - Duration::hours(2)).timestamp_millis()),
                ..Default::default()
            },
            geometry: None,
        };

        assert!(event.passes(2.5, now - Duration::hours(24)));
        assert!(!event.passes(3.5, now - Duration::hours(24)));
        assert!(!event.passes(2.5, now - Duration::hours(1)));
    }

    #[test]
    fn test_event_time_from_millis() {
        let event = UsgsEvent {
            id: None,
            properties: UsgsProperties {
                time: Some(1_701_500_000_000),
                ..Default::default()
            },
            geometry: None,
        };

        assert_eq!(event.event_time().map(|t| t.timestamp()), Some(1_701_500_000));
    }

    #[tokio::test]
    async fn test_fetch_parses_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("format", "geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [
                    feature("ci1", 4.2, 10),
                    feature("ci2", 1.0, 10),
                    feature("ci3", 3.1, 60 * 48),
                    { "type": "Feature", "id": "bad", "properties": { "mag": "huge" } }
                ]
            })))
            .mount(&server)
            .await;

        let client = UsgsClient::new(&config(&server.uri())).unwrap();
        let batch = client.fetch().await.unwrap();

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.filtered, 2);
        match &batch.records[0] {
            RawRecord::Earthquake(event) => assert_eq!(event.id.as_deref(), Some("ci1")),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = UsgsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(client.fetch().await.unwrap_err(), FetchError::HttpError(503));
    }

    #[tokio::test]
    async fn test_fetch_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let client = UsgsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(
            client.fetch().await.unwrap_err(),
            FetchError::RateLimited(Some(30))
        );
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = UsgsClient::new(&config(&server.uri())).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(1500))
                    .set_body_json(json!({ "type": "FeatureCollection", "features": [] })),
            )
            .mount(&server)
            .await;

        let client = UsgsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(client.fetch().await.unwrap_err(), FetchError::Timeout);
    }
}
