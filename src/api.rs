//! HTTP API handlers for the disaster feed.
//!
//! Handlers only read snapshots or enqueue refresh requests. None of them waits on
//! an upstream fetch, so a slow or failing source never slows down a query; its
//! staleness shows up in `as_of` and in `/sources/health` instead.
//!
//! # Endpoints
//!
//! - `GET /records` - Filtered disaster records (and optionally relief centers)
//! - `GET /records/:source_type/:id` - One disaster record
//! - `GET /relief-centers` - Relief centers, fullest first
//! - `GET /statistics` - Aggregate counts
//! - `GET /regions`, `GET /regions/:name` - Configured regions
//! - `GET /sources/health` - Fetch health per source type
//! - `POST /refresh` - Force a refresh of one or all sources
//! - `GET /health` - Liveness

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::model::{DisasterRecord, ReliefCenterRecord, SourceHealth, SourceType};
use crate::query::{DisasterQuery, Statistics, find_disaster, query_disasters, query_relief_centers};
use crate::region::{RegionDefinition, RegionIndex};
use crate::scheduler::{RefreshOutcome, RefreshScheduler, RefreshTarget};
use crate::storage::SnapshotStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
    pub scheduler: Arc<RefreshScheduler>,
    pub regions: Arc<RegionIndex>,
    pub default_limit: usize,
}

impl AppState {
    /// Canonical region tag for a name or code; unknown names pass through unchanged.
    fn region_tag(&self, region: Option<&str>) -> Option<String> {
        region.map(|r| self.regions.resolve(r).unwrap_or(r).to_string())
    }
}

/// Build the router with every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/records", get(get_records))
        .route("/records/:source_type/:id", get(get_record))
        .route("/relief-centers", get(get_relief_centers))
        .route("/statistics", get(get_statistics))
        .route("/regions", get(get_regions))
        .route("/regions/:name", get(get_region))
        .route("/sources/health", get(get_sources_health))
        .route("/refresh", post(post_refresh))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Parse a comma-separated list of source types.
fn parse_source_types(value: &str) -> Result<BTreeSet<SourceType>, StatusCode> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SourceType>().map_err(|e| {
                warn!(error = %e, "Invalid source type filter");
                StatusCode::BAD_REQUEST
            })
        })
        .collect()
}

/// Query parameters for `GET /records`.
#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    /// Comma-separated source types (default: all disaster types).
    pub types: Option<String>,
    /// Region name or code.
    pub region: Option<String>,
    /// Minimum severity score, inclusive.
    pub min_severity: Option<f64>,
    /// Maximum records returned.
    pub limit: Option<usize>,
}

/// GET /records - Query the current disaster snapshot.
///
/// # Query Parameters
///
/// - `types` (optional): e.g. `earthquake,weather_alert`. Including `relief_center`
///   adds a `relief_centers` list to the response.
/// - `region` (optional): region name or code, e.g. `UAE` or `CA`
/// - `min_severity` (optional): minimum severity score
/// - `limit` (optional): defaults to the configured limit
///
/// # Response
///
/// ```json
/// {
///     "count": 1,
///     "records": [{ "id": "usgs:us7000abcd", "type": "earthquake", "severity_tier": "high", ... }],
///     "as_of": { "earthquake": "2024-03-01T10:30:00Z", "wildfire": null, ... }
/// }
/// ```
#[instrument(skip(state))]
pub async fn get_records(
    State(state): State<AppState>,
    Query(params): Query<RecordsQuery>,
) -> Result<Json<RecordsResponse>, StatusCode> {
    let source_types = params
        .types
        .as_deref()
        .map(parse_source_types)
        .transpose()?;
    let include_relief = source_types
        .as_ref()
        .is_some_and(|types| types.contains(&SourceType::ReliefCenter));
    let region = state.region_tag(params.region.as_deref());
    let limit = params.limit.unwrap_or(state.default_limit);

    let query = DisasterQuery {
        source_types,
        region: region.clone(),
        min_severity_score: params.min_severity,
        limit: Some(limit),
    };
    let records = query_disasters(&state.store, &query, state.default_limit);
    let relief_centers =
        include_relief.then(|| query_relief_centers(&state.store, region.as_deref(), limit));

    info!(
        count = records.len(),
        region = region.as_deref().unwrap_or("all"),
        "Records queried"
    );

    Ok(Json(RecordsResponse {
        count: records.len(),
        records,
        relief_centers,
        as_of: source_freshness(&state.store),
    }))
}

/// GET /records/:source_type/:id - Look up one disaster record.
#[instrument(skip(state))]
pub async fn get_record(
    State(state): State<AppState>,
    Path((source_type, id)): Path<(String, String)>,
) -> Result<Json<DisasterRecord>, StatusCode> {
    let source_type: SourceType = source_type.parse().map_err(|e| {
        warn!(error = %e, "Invalid source type");
        StatusCode::BAD_REQUEST
    })?;

    find_disaster(&state.store, source_type, &id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Query parameters for `GET /relief-centers`.
#[derive(Debug, Deserialize)]
pub struct ReliefCentersQuery {
    pub region: Option<String>,
    pub limit: Option<usize>,
}

/// GET /relief-centers - Relief centers ordered by occupancy, fullest first.
#[instrument(skip(state))]
pub async fn get_relief_centers(
    State(state): State<AppState>,
    Query(params): Query<ReliefCentersQuery>,
) -> Json<ReliefCentersResponse> {
    let region = state.region_tag(params.region.as_deref());
    let centers = query_relief_centers(
        &state.store,
        region.as_deref(),
        params.limit.unwrap_or(state.default_limit),
    );

    info!(count = centers.len(), "Relief centers queried");

    Json(ReliefCentersResponse {
        count: centers.len(),
        relief_centers: centers,
        as_of: state.store.read(SourceType::ReliefCenter).as_of,
    })
}

/// Query parameters for `GET /statistics`.
#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub region: Option<String>,
}

/// GET /statistics - Aggregate counts over the current snapshot.
#[instrument(skip(state))]
pub async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsQuery>,
) -> Json<Statistics> {
    let region = state.region_tag(params.region.as_deref());
    let stats = Statistics::from_store(&state.store, region.as_deref());

    info!(
        total_disasters = stats.total_disasters,
        severe_count = stats.severe_count,
        "Statistics queried"
    );
    Json(stats)
}

/// GET /regions - Configured regions.
pub async fn get_regions(State(state): State<AppState>) -> Json<Vec<RegionResponse>> {
    Json(state.regions.regions().iter().map(RegionResponse::from).collect())
}

/// GET /regions/:name - One region by name or code.
#[instrument(skip(state))]
pub async fn get_region(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RegionResponse>, StatusCode> {
    state
        .regions
        .get(&name)
        .map(|r| Json(RegionResponse::from(r)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /sources/health - Fetch health and freshness per source type.
///
/// Disabled sources are listed with `enabled: false` and never refresh.
pub async fn get_sources_health(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    let enabled = state.scheduler.enabled();

    let statuses = SourceType::ALL
        .into_iter()
        .map(|source_type| {
            let snapshot = state.store.read(source_type);
            SourceStatus {
                source_type,
                label: source_type.label(),
                enabled: enabled.contains(&source_type),
                as_of: snapshot.as_of,
                record_count: snapshot.records.len(),
                health: snapshot.health.clone(),
            }
        })
        .collect();

    Json(statuses)
}

/// Query parameters for `POST /refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    /// A source type, or `all` (default).
    pub source: Option<String>,
}

/// POST /refresh - Force an out-of-band refresh.
///
/// Returns `202 Accepted` immediately; the refresh runs in the background.
/// Requests for a source whose cycle is already running are coalesced.
///
/// # Response
///
/// ```json
/// { "results": [{ "source_type": "earthquake", "outcome": "triggered" }] }
/// ```
#[instrument(skip(state))]
pub async fn post_refresh(
    State(state): State<AppState>,
    Query(params): Query<RefreshQuery>,
) -> Result<(StatusCode, Json<RefreshResponse>), StatusCode> {
    let target = match params.source.as_deref().map(str::trim) {
        None | Some("") | Some("all") => RefreshTarget::All,
        Some(source) => RefreshTarget::One(source.parse().map_err(|e| {
            warn!(error = %e, "Invalid refresh target");
            StatusCode::BAD_REQUEST
        })?),
    };

    let results = state
        .scheduler
        .request_refresh(target)
        .into_iter()
        .map(|(source_type, outcome)| RefreshResult {
            source_type,
            outcome,
        })
        .collect();

    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { results })))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// `as_of` for each source type, keyed by its wire name.
fn source_freshness(store: &SnapshotStore) -> BTreeMap<String, Option<DateTime<Utc>>> {
    SourceType::ALL
        .into_iter()
        .map(|s| (s.as_str().to_string(), store.read(s).as_of))
        .collect()
}

// ============================================================================
// Response types
// ============================================================================

/// Response for `GET /records`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordsResponse {
    pub count: usize,
    pub records: Vec<DisasterRecord>,

    /// Present only when `relief_center` was among the requested types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relief_centers: Option<Vec<ReliefCenterRecord>>,

    pub as_of: BTreeMap<String, Option<DateTime<Utc>>>,
}

/// Response for `GET /relief-centers`.
#[derive(Debug, Clone, Serialize)]
pub struct ReliefCentersResponse {
    pub count: usize,
    pub relief_centers: Vec<ReliefCenterRecord>,
    pub as_of: Option<DateTime<Utc>>,
}

/// A configured region with its centre point.
#[derive(Debug, Clone, Serialize)]
pub struct RegionResponse {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    /// `[latitude, longitude]`.
    pub center: [f64; 2],
}

impl From<&RegionDefinition> for RegionResponse {
    fn from(region: &RegionDefinition) -> Self {
        let (lat, lon) = region.center();
        Self {
            name: region.name.clone(),
            code: region.code.clone(),
            min_lat: region.min_lat,
            max_lat: region.max_lat,
            min_lon: region.min_lon,
            max_lon: region.max_lon,
            center: [lat, lon],
        }
    }
}

/// One entry of `GET /sources/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_type: SourceType,
    /// Display name, e.g. "Weather Alerts".
    pub label: &'static str,
    pub enabled: bool,
    pub as_of: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub health: SourceHealth,
}

/// Outcome of a refresh request for one source type.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub source_type: SourceType,
    pub outcome: RefreshOutcome,
}

/// Response for `POST /refresh`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub results: Vec<RefreshResult>,
}
