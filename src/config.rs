//! Configuration for the aggregator.
//!
//! # Layering
//!
//! Later layers override earlier ones:
//!
//! 1. Built-in defaults (`config/default.toml`, compiled in)
//! 2. An optional TOML file, named by `DISASTER_FEED_CONFIG` or passed to [`AggregatorConfig::load`]
//! 3. Environment variables with the `DISASTER_FEED_` prefix, `__` between levels
//!    (e.g. `DISASTER_FEED_SOURCES__WILDFIRE__ENABLED=false`)

use std::time::Duration;

use anyhow::{Context, bail, ensure};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::model::SourceType;
use crate::region::RegionDefinition;
use crate::severity::SeverityConfig;

/// Defaults compiled into the binary.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable naming an optional config file.
pub const CONFIG_PATH_ENV: &str = "DISASTER_FEED_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-source settings.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Regions used for tagging and filtering.
    #[serde(default)]
    pub regions: Vec<RegionDefinition>,

    /// Severity thresholds.
    #[serde(default)]
    pub severity: SeverityConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Result limit applied when a query does not give one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            default_limit: default_limit(),
        }
    }
}

/// Settings for each of the four feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub earthquake: SourceConfig,

    #[serde(default)]
    pub wildfire: SourceConfig,

    #[serde(default)]
    pub weather_alert: SourceConfig,

    #[serde(default)]
    pub relief_center: SourceConfig,
}

impl SourcesConfig {
    /// Settings for one source type.
    pub fn get(&self, source_type: SourceType) -> &SourceConfig {
        match source_type {
            SourceType::Earthquake => &self.earthquake,
            SourceType::Wildfire => &self.wildfire,
            SourceType::WeatherAlert => &self.weather_alert,
            SourceType::ReliefCenter => &self.relief_center,
        }
    }

    /// Source types that are switched on.
    pub fn enabled(&self) -> Vec<SourceType> {
        SourceType::ALL
            .into_iter()
            .filter(|s| self.get(*s).enabled)
            .collect()
    }
}

/// Settings for one feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Whether the source is polled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upstream base URL. Empty means the adapter's built-in default.
    #[serde(default)]
    pub base_url: String,

    /// Seconds between scheduled refreshes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on one fetch, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How far back records are kept, in hours.
    #[serde(default = "default_window")]
    pub window_hours: u32,

    /// Most records kept per fetch.
    #[serde(default = "default_max_records")]
    pub max_records: u32,

    /// Earthquakes below this magnitude are dropped.
    #[serde(default)]
    pub min_magnitude: Option<f64>,

    /// Fires smaller than this are dropped.
    #[serde(default)]
    pub min_area_acres: Option<f64>,

    /// User-Agent header sent upstream.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            window_hours: default_window(),
            max_records: default_max_records(),
            min_magnitude: None,
            min_area_acres: None,
            user_agent: None,
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    3000
}

fn default_limit() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    10
}

fn default_window() -> u32 {
    24
}

fn default_max_records() -> u32 {
    500
}

impl AggregatorConfig {
    /// Load configuration: built-in defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Self::defaults();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("DISASTER_FEED")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::finish(builder)
    }

    /// Built-in defaults overlaid with a TOML document.
    pub fn from_toml(overrides: &str) -> anyhow::Result<Self> {
        let builder = Self::defaults().add_source(File::from_str(overrides, FileFormat::Toml));
        Self::finish(builder)
    }

    fn defaults() -> ConfigBuilder<DefaultState> {
        config::Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config: Self = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the aggregator cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.severity.earthquake.is_ascending(),
            "earthquake severity thresholds must be ascending"
        );
        ensure!(
            self.severity.earthquake_risk.is_valid(),
            "earthquake risk depth bands and thresholds must be ascending and finite"
        );
        ensure!(
            self.severity.wildfire.tiers().is_ascending(),
            "wildfire severity thresholds must be ascending"
        );
        ensure!(self.server.default_limit > 0, "server.default_limit must be positive");

        for source_type in SourceType::ALL {
            let source = self.sources.get(source_type);
            if !source.enabled {
                continue;
            }
            ensure!(
                source.poll_interval_secs > 0,
                "{source_type}: poll_interval_secs must be positive"
            );
            ensure!(source.timeout_secs > 0, "{source_type}: timeout_secs must be positive");
        }

        for region in &self.regions {
            if region.name.trim().is_empty() {
                bail!("region names must not be empty");
            }
            ensure!(
                (-90.0..=90.0).contains(&region.min_lat)
                    && (-90.0..=90.0).contains(&region.max_lat)
                    && region.min_lat <= region.max_lat,
                "region {}: invalid latitude bounds",
                region.name
            );
            ensure!(
                (-180.0..=180.0).contains(&region.min_lon) && (-180.0..=180.0).contains(&region.max_lon),
                "region {}: invalid longitude bounds",
                region.name
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::ThresholdScale;

    #[test]
    fn test_builtin_defaults() {
        let config = AggregatorConfig::from_toml("").unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.default_limit, 100);
        assert_eq!(config.sources.enabled().len(), 4);
        assert_eq!(config.sources.earthquake.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.sources.earthquake.min_magnitude, Some(2.5));
        assert!(config.sources.relief_center.base_url.is_empty());
        assert_eq!(config.severity.earthquake.high, 5.5);
        assert_eq!(config.severity.wildfire.scale, ThresholdScale::Relative);

        let names: Vec<_> = config.regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["UAE", "Canada"]);
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let config = AggregatorConfig::from_toml(
            r#"
            [server]
            port = 8080

            [sources.wildfire]
            enabled = false

            [severity.wildfire]
            scale = "absolute"
            moderate = 1000.0
            high = 10000.0
            critical = 50000.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(!config.sources.wildfire.enabled);
        assert_eq!(
            config.sources.enabled(),
            vec![SourceType::Earthquake, SourceType::WeatherAlert, SourceType::ReliefCenter]
        );
        assert_eq!(config.severity.wildfire.scale, ThresholdScale::Absolute);
        // Untouched keys keep their defaults.
        assert_eq!(config.sources.wildfire.timeout_secs, 15);
    }

    #[test]
    fn test_descending_thresholds_rejected() {
        let err = AggregatorConfig::from_toml(
            r#"
            [severity.earthquake]
            moderate = 6.0
            high = 5.0
            critical = 7.0
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("ascending"));
    }

    #[test]
    fn test_earthquake_risk_bands_configurable() {
        let config = AggregatorConfig::from_toml(
            r#"
            [severity.earthquake_risk]
            shallow_max_km = 50.0
            "#,
        )
        .unwrap();

        let risk = config.severity.earthquake_risk;
        assert_eq!(risk.shallow_max_km, 50.0);
        assert_eq!(risk.intermediate_max_km, 300.0);
        assert_eq!(risk.critical, 6.5);

        let result = AggregatorConfig::from_toml(
            r#"
            [severity.earthquake_risk]
            intermediate_max_km = 20.0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = AggregatorConfig::from_toml(
            r#"
            [sources.earthquake]
            poll_interval_secs = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AggregatorConfig::load(Some("/nonexistent/disaster-feed.toml")).is_err());
    }
}
