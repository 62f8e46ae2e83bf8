//! External data sources for disaster and relief information.
//!
//! Each client wraps exactly one upstream API and implements [`SourceAdapter`].
//! A fetch either yields a (possibly empty) batch of source-native records or a
//! single [`FetchError`]; a record that fails to parse is skipped and counted,
//! never fatal to the batch.
//!
//! # Data Sources
//!
//! - [`usgs`]: USGS FDSN event service - earthquakes
//! - [`wfigs`]: NIFC WFIGS current incident locations - wildfires
//! - [`nws`]: National Weather Service active alerts - weather alerts
//! - [`relief_centers`]: relief center capacity feed, or the bundled dataset

pub mod geojson;
pub mod nws;
pub mod relief_centers;
pub mod usgs;
pub mod wfigs;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::model::{ErrorKind, SourceType};

pub use nws::{NwsAlert, NwsClient};
pub use relief_centers::{ReliefCenterClient, ReliefCenterFeature};
pub use usgs::{UsgsClient, UsgsEvent};
pub use wfigs::{WfigsClient, WfigsIncident};

/// Adapter-level fetch failure. Never fatal; the next scheduled cycle is the retry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("upstream returned HTTP {0}")]
    HttpError(u16),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("rate limited (retry after {0:?} seconds)")]
    RateLimited(Option<u64>),

    #[error("connection failed: {0}")]
    Connection(String),
}

impl FetchError {
    /// Coarse kind recorded in source health.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout => ErrorKind::Timeout,
            FetchError::HttpError(_) => ErrorKind::HttpError,
            FetchError::MalformedPayload(_) => ErrorKind::MalformedPayload,
            FetchError::RateLimited(_) => ErrorKind::RateLimited,
            FetchError::Connection(_) => ErrorKind::Connection,
        }
    }

    /// HTTP status, for HTTP errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpError(status) => Some(*status),
            FetchError::RateLimited(_) => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() || e.is_body() {
            FetchError::MalformedPayload(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::HttpError(status.as_u16())
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}

/// A source-native record, parsed but not yet normalized.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Earthquake(UsgsEvent),
    Wildfire(WfigsIncident),
    WeatherAlert(NwsAlert),
    ReliefCenter(ReliefCenterFeature),
}

/// Output of one successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Records that parsed and passed the source-specific filters.
    pub records: Vec<RawRecord>,

    /// Records that failed to parse.
    pub skipped: usize,

    /// Records that parsed but were outside the configured window or threshold.
    pub filtered: usize,
}

/// One upstream feed.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source type whose snapshot this adapter feeds.
    fn source_type(&self) -> SourceType;

    /// Short name of the upstream service (e.g. "usgs").
    fn source_name(&self) -> &str;

    /// Fetch the current records. Must return within the configured timeout.
    async fn fetch(&self) -> Result<FetchBatch, FetchError>;
}

/// Build one adapter per enabled source type.
pub fn build_adapters(config: &SourcesConfig) -> reqwest::Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    for source_type in config.enabled() {
        let source = config.get(source_type);
        let adapter: Arc<dyn SourceAdapter> = match source_type {
            SourceType::Earthquake => Arc::new(UsgsClient::new(source)?),
            SourceType::Wildfire => Arc::new(WfigsClient::new(source)?),
            SourceType::WeatherAlert => Arc::new(NwsClient::new(source)?),
            SourceType::ReliefCenter => Arc::new(ReliefCenterClient::new(source)?),
        };
        adapters.push(adapter);
    }

    Ok(adapters)
}

/// Build a reqwest client with the per-source timeout applied to every request.
pub(crate) fn build_http_client(
    timeout: Duration,
    user_agent: Option<&str>,
) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(agent) = user_agent {
        builder = builder.user_agent(agent.to_string());
    }
    builder.build()
}

/// A GeoJSON FeatureCollection whose features are kept as raw JSON so each one
/// can be parsed (and skipped) individually.
#[derive(Debug, Deserialize)]
struct RawFeatureCollection {
    features: Vec<serde_json::Value>,
}

/// GET a GeoJSON FeatureCollection and return its features unparsed.
pub(crate) async fn get_features(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<serde_json::Value>, FetchError> {
    let response = client
        .get(url)
        .header("Accept", "application/geo+json, application/json")
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(FetchError::RateLimited(retry_after));
    }
    if !status.is_success() {
        return Err(FetchError::HttpError(status.as_u16()));
    }

    let body = response.text().await?;
    parse_feature_collection(&body)
}

/// Parse a FeatureCollection body without parsing the features themselves.
pub(crate) fn parse_feature_collection(body: &str) -> Result<Vec<serde_json::Value>, FetchError> {
    serde_json::from_str::<RawFeatureCollection>(body)
        .map(|collection| collection.features)
        .map_err(|e| {
            FetchError::MalformedPayload(format!(
                "expected a feature collection: {} - Body: {}",
                e,
                body.chars().take(200).collect::<String>()
            ))
        })
}

/// Parse each feature, skipping (and counting) the ones that do not fit `T`.
pub(crate) fn parse_features<T: DeserializeOwned>(
    source: &str,
    features: Vec<serde_json::Value>,
) -> (Vec<T>, usize) {
    let mut parsed = Vec::with_capacity(features.len());
    let mut skipped = 0;

    for feature in features {
        match serde_json::from_value::<T>(feature) {
            Ok(record) => parsed.push(record),
            Err(e) => {
                debug!(source, error = %e, "Skipping unparseable feature");
                skipped += 1;
            }
        }
    }

    (parsed, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    #[test]
    fn test_bad_features_are_skipped_not_fatal() {
        let features = vec![
            serde_json::json!({ "name": "a" }),
            serde_json::json!({ "name": 42 }),
            serde_json::json!({ "name": "c" }),
        ];

        let (parsed, skipped) = parse_features::<Named>("test", features);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, "c");
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_non_collection_body_is_malformed() {
        let err = parse_feature_collection("<html>oops</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);

        let err = parse_feature_collection(r#"{"type": "Feature"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn test_empty_collection_is_ok() {
        let features =
            parse_feature_collection(r#"{"type": "FeatureCollection", "features": []}"#).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_build_adapters_skips_disabled_sources() {
        let mut config = crate::config::AggregatorConfig::from_toml("")
            .unwrap()
            .sources;
        config.wildfire.enabled = false;
        config.relief_center.base_url = String::new();

        let adapters = build_adapters(&config).unwrap();
        let types: Vec<SourceType> = adapters.iter().map(|a| a.source_type()).collect();

        assert_eq!(
            types,
            vec![
                SourceType::Earthquake,
                SourceType::WeatherAlert,
                SourceType::ReliefCenter
            ]
        );
        assert_eq!(adapters[2].source_name(), "bundled");
    }

    #[test]
    fn test_error_kinds_and_status() {
        assert_eq!(FetchError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(FetchError::HttpError(502).status(), Some(502));
        assert_eq!(FetchError::RateLimited(Some(30)).status(), Some(429));
        assert_eq!(FetchError::Timeout.status(), None);
    }
}
