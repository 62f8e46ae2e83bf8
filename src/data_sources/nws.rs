//! National Weather Service active alerts client.
//!
//! The NWS API publishes every active watch, warning and advisory as a GeoJSON
//! FeatureCollection. Requests without a descriptive `User-Agent` are rejected.
//!
//! # API Reference
//!
//! See: <https://www.weather.gov/documentation/services-web-api>
//!
//! # Geometry
//!
//! Alerts issued against forecast zones frequently carry no geometry. Those are
//! passed through and rejected at normalization for missing coordinates.

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

/// Base URL for the NWS API.
const NWS_API_BASE: &str = "https://api.weather.gov";

/// Sent when no user agent is configured.
const DEFAULT_USER_AGENT: &str = concat!("disaster-feed/", env!("CARGO_PKG_VERSION"));

/// Client for the NWS alerts endpoint.
#[derive(Clone)]
pub struct NwsClient {
    client: reqwest::Client,
    base_url: String,
    window: Duration,
    max_records: u32,
}

impl NwsClient {
    /// Create a client from the weather alert source configuration.
    pub fn new(config: &SourceConfig) -> reqwest::Result<Self> {
        let base_url = if config.base_url.is_empty() {
            NWS_API_BASE
        } else {
            config.base_url.trim_end_matches('/')
        };
        let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);

        Ok(Self {
            client: build_http_client(config.timeout(), Some(user_agent))?,
            base_url: base_url.to_string(),
            window: Duration::hours(i64::from(config.window_hours)),
            max_records: config.max_records,
        })
    }

    /// Fetch all active, actual (non-test, non-exercise) alerts.
    pub async fn get_active_alerts(&self) -> Result<(Vec<NwsAlert>, usize), FetchError> {
        let url = format!("{}/alerts/active?status=actual", self.base_url);
        let features = get_features(&self.client, &url).await?;
        Ok(parse_features("nws", features))
    }
}

#[async_trait]
impl SourceAdapter for NwsClient {
    fn source_type(&self) -> SourceType {
        SourceType::WeatherAlert
    }

    fn source_name(&self) -> &str {
        "nws"
    }

    async fn fetch(&self) -> Result<FetchBatch, FetchError> {
        let (alerts, skipped) = self.get_active_alerts().await?;
        let now = Utc::now();
        let cutoff = now - self.window;

        let total = alerts.len();
        let records: Vec<RawRecord> = alerts
            .into_iter()
            .filter(|a| !a.is_expired(now) && a.issued_at().is_none_or(|t| t >= cutoff))
            .take(self.max_records as usize)
            .map(RawRecord::WeatherAlert)
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

/// A single alert feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwsAlert {
    /// Alert properties.
    pub properties: NwsAlertProperties,

    /// Alert area, when the alert is polygon-based.
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Properties of an NWS alert (CAP fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NwsAlertProperties {
    /// Alert identifier (a URN).
    #[serde(default)]
    pub id: Option<String>,

    /// Event name (e.g. "Tornado Warning").
    #[serde(default)]
    pub event: Option<String>,

    /// One-line headline.
    #[serde(default)]
    pub headline: Option<String>,

    /// CAP severity: Extreme, Severe, Moderate, Minor, Unknown.
    #[serde(default)]
    pub severity: Option<String>,

    /// Human-readable affected area.
    #[serde(default)]
    pub area_desc: Option<String>,

    /// Time the alert was sent (RFC 3339).
    #[serde(default)]
    pub sent: Option<String>,

    /// Time the hazard begins (RFC 3339).
    #[serde(default)]
    pub onset: Option<String>,

    /// Time the alert expires (RFC 3339).
    #[serde(default)]
    pub expires: Option<String>,

    /// Link to the full alert document.
    #[serde(default, rename = "@id")]
    pub link: Option<String>,
}

impl NwsAlert {
    /// When the alert was issued.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        parse_time(self.properties.sent.as_deref())
    }

    /// Whether the alert has expired as of `now`. Alerts without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        parse_time(self.properties.expires.as_deref()).is_some_and(|t| t < now)
    }
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SourceConfig {
        SourceConfig {
            base_url: base_url.to_string(),
            timeout_secs: 1,
            window_hours: 48,
            max_records: 100,
            user_agent: Some("disaster-feed-test (test@example.org)".to_string()),
            ..SourceConfig::default()
        }
    }

    fn alert(id: &str, severity: &str, expires_in_hours: i64) -> serde_json::Value {
        let now = Utc::now();
        json!({
            "type": "Feature",
            "properties": {
                "id": id,
                "event": "Flood Warning",
                "headline": format!("{id} headline"),
                "severity": severity,
                "sent": (now - Duration::hours(1)).to_rfc3339(),
                "expires": (now + Duration::hours(expires_in_hours)).to_rfc3339()
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-80.0, 45.0], [-79.0, 45.0], [-79.0, 46.0], [-80.0, 46.0], [-80.0, 45.0]]]
            }
        })
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut alert = NwsAlert {
            properties: NwsAlertProperties {
                expires: Some((now - Duration::minutes(5)).to_rfc3339()),
                ..Default::default()
            },
            geometry: None,
        };
        assert!(alert.is_expired(now));

        alert.properties.expires = None;
        assert!(!alert.is_expired(now));
    }

    #[test]
    fn test_camel_case_fields() {
        let alert: NwsAlert = serde_json::from_value(json!({
            "properties": { "areaDesc": "Ottawa", "@id": "https://api.weather.gov/alerts/x" }
        }))
        .unwrap();

        assert_eq!(alert.properties.area_desc.as_deref(), Some("Ottawa"));
        assert!(alert.properties.link.is_some());
        assert!(alert.geometry.is_none());
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent_and_drops_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts/active"))
            .and(query_param("status", "actual"))
            .and(header("user-agent", "disaster-feed-test (test@example.org)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [
                    alert("urn:a", "Severe", 6),
                    alert("urn:b", "Minor", -2),
                    alert("urn:c", "Extreme", 1)
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NwsClient::new(&config(&server.uri())).unwrap();
        let batch = client.fetch().await.unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.filtered, 1);
        assert_eq!(batch.skipped, 0);
    }

    #[tokio::test]
    async fn test_fetch_truncates_to_max_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "FeatureCollection",
                "features": [alert("1", "Minor", 2), alert("2", "Minor", 2), alert("3", "Minor", 2)]
            })))
            .mount(&server)
            .await;

        let client = NwsClient::new(&SourceConfig {
            max_records: 2,
            ..config(&server.uri())
        })
        .unwrap();
        let batch = client.fetch().await.unwrap();

        assert_eq!(batch.records.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = NwsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(client.fetch().await.unwrap_err(), FetchError::HttpError(403));
    }

    #[tokio::test]
    async fn test_fetch_rate_limited_without_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = NwsClient::new(&config(&server.uri())).unwrap();
        assert_eq!(client.fetch().await.unwrap_err(), FetchError::RateLimited(None));
    }
}
