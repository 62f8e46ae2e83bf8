//! Disaster Feed - aggregates public disaster feeds into one queryable snapshot.
//!
//! # Overview
//!
//! Polls USGS earthquakes, NIFC wildfire incidents, NWS weather alerts and a relief
//! center feed on independent intervals, normalizes and classifies what they return,
//! and serves the latest snapshot over HTTP.
//!
//! # Configuration
//!
//! Built-in defaults are overlaid with the TOML file named by `DISASTER_FEED_CONFIG`
//! (if set) and then with `DISASTER_FEED_*` environment variables, e.g.
//! `DISASTER_FEED_SERVER__PORT=8080` or `DISASTER_FEED_SOURCES__WILDFIRE__ENABLED=false`.
//!
//! # API Endpoints
//!
//! - `GET /records` - Query disaster records
//! - `GET /records/:source_type/:id` - One disaster record
//! - `GET /relief-centers` - Relief centers by occupancy
//! - `GET /statistics` - Aggregate counts
//! - `GET /regions` - Configured regions
//! - `GET /sources/health` - Per-source fetch health
//! - `POST /refresh` - Force a refresh
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use disaster_feed::api::{self, AppState};
use disaster_feed::config::{AggregatorConfig, CONFIG_PATH_ENV};
use disaster_feed::data_sources::build_adapters;
use disaster_feed::model::SourceType;
use disaster_feed::region::RegionIndex;
use disaster_feed::scheduler::RefreshScheduler;
use disaster_feed::severity::SeverityRules;
use disaster_feed::storage::SnapshotStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("disaster_feed=info".parse()?))
        .init();

    let config_path = env::var(CONFIG_PATH_ENV).ok();
    let config = AggregatorConfig::load(config_path.as_deref())?;

    info!(
        port = config.server.port,
        config = config_path.as_deref().unwrap_or("built-in"),
        regions = config.regions.len(),
        "Starting disaster feed"
    );

    let adapters = build_adapters(&config.sources)?;
    let store = SnapshotStore::with_sources(
        SourceType::ALL.map(|source_type| {
            let name = adapters
                .iter()
                .find(|a| a.source_type() == source_type)
                .map_or(source_type.as_str(), |a| a.source_name());
            (source_type, name)
        }),
    );

    let regions = Arc::new(RegionIndex::new(config.regions.clone()));
    let mut scheduler = RefreshScheduler::new(
        store.clone(),
        regions.clone(),
        SeverityRules::new(config.severity),
    );
    for adapter in adapters {
        let source = config.sources.get(adapter.source_type());
        scheduler.register(adapter, source.poll_interval(), source.timeout());
    }

    let disabled: Vec<_> = SourceType::ALL
        .into_iter()
        .filter(|s| !scheduler.enabled().contains(s))
        .collect();
    if !disabled.is_empty() {
        warn!(?disabled, "Some sources are disabled and will not refresh");
    }

    let scheduler = Arc::new(scheduler);
    let workers = scheduler.start();

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        regions,
        default_limit: config.server.default_limit,
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Disaster feed is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down refresh loops");
    scheduler.shutdown();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Refresh loop ended abnormally");
        }
    }

    Ok(())
}
