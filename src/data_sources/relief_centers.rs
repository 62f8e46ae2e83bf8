//! Relief center capacity client.
//!
//! Relief centers are published as a GeoJSON FeatureCollection of points carrying
//! capacity, occupancy and the resources each center provides. When no feed URL is
//! configured the client serves the dataset bundled with the crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::geojson::Geometry;
use super::{
    FetchBatch, FetchError, RawRecord, SourceAdapter, build_http_client, get_features,
    parse_feature_collection, parse_features,
};
use crate::config::SourceConfig;
use crate::model::SourceType;

/// Dataset served when no feed URL is configured.
const BUNDLED_DATASET: &str = include_str!("../../data/relief_centers.geojson");

/// Where the features come from.
#[derive(Clone)]
enum Origin {
    Remote { client: reqwest::Client, url: String },
    Bundled,
}

/// Client for a relief center feed.
#[derive(Clone)]
pub struct ReliefCenterClient {
    origin: Origin,
    max_records: u32,
}

impl ReliefCenterClient {
    /// Create a client from the relief center source configuration.
    ///
    /// An empty `base_url` selects the bundled dataset.
    pub fn new(config: &SourceConfig) -> reqwest::Result<Self> {
        let origin = if config.base_url.is_empty() {
            Origin::Bundled
        } else {
            Origin::Remote {
                client: build_http_client(config.timeout(), config.user_agent.as_deref())?,
                url: config.base_url.clone(),
            }
        };

        Ok(Self {
            origin,
            max_records: config.max_records,
        })
    }

    /// Fetch all relief center features.
    pub async fn get_centers(&self) -> Result<(Vec<ReliefCenterFeature>, usize), FetchError> {
        let features = match &self.origin {
            Origin::Remote { client, url } => get_features(client, url).await?,
            Origin::Bundled => parse_feature_collection(BUNDLED_DATASET)?,
        };
        Ok(parse_features("relief_centers", features))
    }
}

#[async_trait]
impl SourceAdapter for ReliefCenterClient {
    fn source_type(&self) -> SourceType {
        SourceType::ReliefCenter
    }

    fn source_name(&self) -> &str {
        match self.origin {
            Origin::Remote { .. } => "relief_feed",
            Origin::Bundled => "bundled",
        }
    }

    async fn fetch(&self) -> Result<FetchBatch, FetchError> {
        let (centers, skipped) = self.get_centers().await?;

        let total = centers.len();
        let records: Vec<RawRecord> = centers
            .into_iter()
            .take(self.max_records as usize)
            .map(RawRecord::ReliefCenter)
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

/// A single relief center feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliefCenterFeature {
    /// Center attributes.
    pub properties: ReliefCenterProperties,

    /// Point location.
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Relief center attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReliefCenterProperties {
    /// Center identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Total capacity (people).
    #[serde(default)]
    pub capacity: Option<u32>,

    /// People currently housed.
    #[serde(default)]
    pub current_occupancy: Option<u32>,

    /// Available resources.
    #[serde(default)]
    pub resources: Option<Resources>,

    /// Phone or other contact.
    #[serde(default)]
    pub contact: Option<String>,
}

/// Resources as published: either a plain list of names or a name-to-quantity map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resources {
    Quantities(BTreeMap<String, u32>),
    Names(Vec<String>),
}

impl Resources {
    /// Resource name to quantity. Listed names count as one unit each.
    pub fn to_quantities(&self) -> BTreeMap<String, u32> {
        match self {
            Resources::Quantities(map) => map.clone(),
            Resources::Names(names) => names
                .iter()
                .map(|name| (name.clone(), 1))
                .collect(),
        }
    }
}
