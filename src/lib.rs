//! Disaster Feed - one classified, queryable view over several public disaster feeds.
//!
//! # Overview
//!
//! Each upstream feed (USGS earthquakes, NIFC wildfire incidents, NWS weather alerts,
//! relief center capacity) is polled on its own interval. Every cycle fetches a batch,
//! normalizes it to a common record shape, tags each record with the configured
//! regions it falls in, assigns a severity tier and atomically replaces that source's
//! snapshot. Readers always see a complete snapshot per source, never a partial one.
//!
//! A failing source keeps serving its last good snapshot; the failure is recorded in
//! its health and the next scheduled cycle is the retry.
//!
//! # Modules
//!
//! - [`model`]: Record, severity and health types
//! - [`config`]: Layered configuration (defaults, file, environment)
//! - [`data_sources`]: One adapter per upstream feed
//! - [`normalize`]: Raw records to normalized records, with per-reason reject counts
//! - [`region`]: Bounding-box region tagging
//! - [`severity`]: Severity scoring and tiering
//! - [`storage`]: Per-source snapshot store
//! - [`scheduler`]: Refresh loops, forced refresh and coalescing
//! - [`query`]: Filtering, ordering and statistics over snapshots
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod config;
pub mod data_sources;
pub mod model;
pub mod normalize;
pub mod query;
pub mod region;
pub mod scheduler;
pub mod severity;
pub mod storage;

#[cfg(test)]
mod fixtures;
