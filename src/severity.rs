//! Severity classification for normalized disaster records.
//!
//! # Rules
//!
//! - **earthquake**: score = magnitude. Low < 4.0 <= Moderate < 5.5 <= High < 7.0 <= Critical.
//! - **wildfire**: score = affected area x (1 - containment fraction). Thresholds are either
//!   absolute acres or fractions of the largest fire in the same batch.
//! - **weather_alert**: score = ordinal from a fixed lookup of the source's severity word.
//!
//! Earthquakes also get a depth-adjusted `risk_tier`: magnitude times a depth factor
//! (1.0 shallower than 70 km, 0.8 shallower than 300 km, 0.6 deeper), bucketed at
//! 4.0 / 5.5 / 6.5. A missing depth counts as shallow.
//!
//! Classification is total: a missing or out-of-range raw value yields `Low` with score 0
//! and the `unclassified` flag set, never an error.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::model::{DisasterRecord, RawSeverity, SeverityTier};
use crate::normalize::NormalizedDisaster;

/// Magnitudes outside this range are treated as bad data.
pub const MAGNITUDE_RANGE: RangeInclusive<f64> = -2.0..=10.0;

/// Lower bounds of the Moderate, High and Critical tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            moderate: 4.0,
            high: 5.5,
            critical: 7.0,
        }
    }
}

impl TierThresholds {
    /// Map a score onto a tier. Each lower bound is inclusive.
    pub fn tier_for(&self, score: f64) -> SeverityTier {
        if score >= self.critical {
            SeverityTier::Critical
        } else if score >= self.high {
            SeverityTier::High
        } else if score >= self.moderate {
            SeverityTier::Moderate
        } else {
            SeverityTier::Low
        }
    }

    /// Whether the bounds are finite and non-decreasing.
    pub fn is_ascending(&self) -> bool {
        [self.moderate, self.high, self.critical]
            .iter()
            .all(|t| t.is_finite())
            && self.moderate <= self.high
            && self.high <= self.critical
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            moderate: self.moderate * factor,
            high: self.high * factor,
            critical: self.critical * factor,
        }
    }
}

/// How wildfire thresholds are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdScale {
    /// Fractions of the largest weighted area in the batch.
    Relative,
    /// Weighted acres.
    Absolute,
}

/// Wildfire threshold configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WildfireThresholds {
    pub scale: ThresholdScale,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for WildfireThresholds {
    fn default() -> Self {
        Self {
            scale: ThresholdScale::Relative,
            moderate: 0.40,
            high: 0.55,
            critical: 0.70,
        }
    }
}

impl WildfireThresholds {
    pub fn tiers(&self) -> TierThresholds {
        TierThresholds {
            moderate: self.moderate,
            high: self.high,
            critical: self.critical,
        }
    }

    /// Resolve to absolute thresholds given the largest weighted area observed.
    ///
    /// Returns `None` for a relative scale when nothing burned, in which case every fire is Low.
    pub fn resolve(&self, max_observed: f64) -> Option<TierThresholds> {
        match self.scale {
            ThresholdScale::Absolute => Some(self.tiers()),
            ThresholdScale::Relative if max_observed > 0.0 => {
                Some(self.tiers().scaled(max_observed))
            }
            ThresholdScale::Relative => None,
        }
    }
}

/// Depth bands and thresholds for the earthquake risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthquakeRisk {
    /// Events shallower than this use `shallow_factor`.
    pub shallow_max_km: f64,
    /// Events shallower than this (and not shallow) use `intermediate_factor`.
    pub intermediate_max_km: f64,
    pub shallow_factor: f64,
    pub intermediate_factor: f64,
    pub deep_factor: f64,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for EarthquakeRisk {
    fn default() -> Self {
        Self {
            shallow_max_km: 70.0,
            intermediate_max_km: 300.0,
            shallow_factor: 1.0,
            intermediate_factor: 0.8,
            deep_factor: 0.6,
            moderate: 4.0,
            high: 5.5,
            critical: 6.5,
        }
    }
}

impl EarthquakeRisk {
    pub fn tiers(&self) -> TierThresholds {
        TierThresholds {
            moderate: self.moderate,
            high: self.high,
            critical: self.critical,
        }
    }

    /// Weight applied to the magnitude at the given depth.
    pub fn depth_factor(&self, depth_km: Option<f64>) -> f64 {
        match depth_km.filter(|d| d.is_finite()) {
            Some(depth) if depth >= self.intermediate_max_km => self.deep_factor,
            Some(depth) if depth >= self.shallow_max_km => self.intermediate_factor,
            _ => self.shallow_factor,
        }
    }

    /// Depth-adjusted score and tier for a valid magnitude.
    pub fn assess(&self, magnitude: f64, depth_km: Option<f64>) -> (f64, SeverityTier) {
        let score = magnitude * self.depth_factor(depth_km);
        (score, self.tiers().tier_for(score))
    }

    /// Whether the bands and thresholds are usable.
    pub fn is_valid(&self) -> bool {
        let factors = [self.shallow_factor, self.intermediate_factor, self.deep_factor];
        self.tiers().is_ascending()
            && self.shallow_max_km.is_finite()
            && self.intermediate_max_km.is_finite()
            && self.shallow_max_km <= self.intermediate_max_km
            && factors.iter().all(|f| f.is_finite() && *f >= 0.0)
    }
}

/// Severity thresholds per disaster type, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SeverityConfig {
    #[serde(default)]
    pub earthquake: TierThresholds,

    #[serde(default)]
    pub earthquake_risk: EarthquakeRisk,

    #[serde(default)]
    pub wildfire: WildfireThresholds,
}

/// Result of classifying one raw value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub tier: SeverityTier,
    pub score: f64,
    pub unclassified: bool,
}

impl Classification {
    fn classified(tier: SeverityTier, score: f64) -> Self {
        Self {
            tier,
            score,
            unclassified: false,
        }
    }

    fn unclassified() -> Self {
        Self {
            tier: SeverityTier::Low,
            score: 0.0,
            unclassified: true,
        }
    }
}

/// Ordinal for a weather alert severity word, 1 (minor) to 4 (extreme).
///
/// Accepts the CAP vocabulary used by NWS as well as the Low/Medium/High/Extreme
/// wording some regional feeds use.
pub fn alert_ordinal(level: &str) -> Option<u8> {
    match level.trim().to_lowercase().as_str() {
        "minor" | "low" => Some(1),
        "moderate" | "medium" => Some(2),
        "severe" | "high" => Some(3),
        "extreme" | "critical" => Some(4),
        _ => None,
    }
}

fn ordinal_tier(ordinal: u8) -> SeverityTier {
    match ordinal {
        4 => SeverityTier::Critical,
        3 => SeverityTier::High,
        2 => SeverityTier::Moderate,
        _ => SeverityTier::Low,
    }
}

/// Weighted burning area, or `None` if the inputs are missing or out of range.
pub fn weighted_fire_area(area_acres: Option<f64>, containment_percent: Option<f64>) -> Option<f64> {
    let area = area_acres.filter(|a| a.is_finite() && *a >= 0.0)?;
    let contained = containment_percent.filter(|c| c.is_finite() && (0.0..=100.0).contains(c))?;
    Some(area * (1.0 - contained / 100.0))
}

/// Configured rules, from which a classifier is built per batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityRules {
    config: SeverityConfig,
}

impl SeverityRules {
    pub fn new(config: SeverityConfig) -> Self {
        Self { config }
    }

    /// Build the classifier for one fetch batch.
    ///
    /// Only relative wildfire thresholds depend on the batch; everything else is fixed.
    pub fn classifier_for(&self, batch: &[NormalizedDisaster]) -> SeverityClassifier {
        let max_fire = batch
            .iter()
            .filter_map(|d| match &d.raw {
                RawSeverity::FireExtent {
                    area_acres,
                    containment_percent,
                } => weighted_fire_area(*area_acres, *containment_percent),
                _ => None,
            })
            .fold(0.0_f64, f64::max);

        SeverityClassifier {
            earthquake: self.config.earthquake,
            earthquake_risk: self.config.earthquake_risk,
            wildfire: self.config.wildfire.resolve(max_fire),
        }
    }

    /// Classify a whole batch.
    pub fn classify_batch(&self, batch: Vec<NormalizedDisaster>) -> Vec<DisasterRecord> {
        let classifier = self.classifier_for(&batch);
        batch.into_iter().map(|d| classifier.apply(d)).collect()
    }
}

/// Deterministic, total classifier with fully resolved thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityClassifier {
    earthquake: TierThresholds,
    earthquake_risk: EarthquakeRisk,
    wildfire: Option<TierThresholds>,
}

impl SeverityClassifier {
    pub fn new(earthquake: TierThresholds, wildfire: Option<TierThresholds>) -> Self {
        Self {
            earthquake,
            earthquake_risk: EarthquakeRisk::default(),
            wildfire,
        }
    }

    pub fn with_earthquake_risk(self, earthquake_risk: EarthquakeRisk) -> Self {
        Self {
            earthquake_risk,
            ..self
        }
    }

    /// Depth-adjusted risk tier. `None` for other types and unclassified magnitudes.
    pub fn risk_tier(&self, raw: &RawSeverity, depth_km: Option<f64>) -> Option<SeverityTier> {
        match raw {
            RawSeverity::Magnitude { value: Some(mag) } if MAGNITUDE_RANGE.contains(mag) => {
                Some(self.earthquake_risk.assess(*mag, depth_km).1)
            }
            _ => None,
        }
    }

    /// Classify a raw severity value.
    pub fn classify(&self, raw: &RawSeverity) -> Classification {
        match raw {
            RawSeverity::Magnitude { value } => match value {
                Some(mag) if MAGNITUDE_RANGE.contains(mag) => {
                    Classification::classified(self.earthquake.tier_for(*mag), *mag)
                }
                _ => Classification::unclassified(),
            },
            RawSeverity::FireExtent {
                area_acres,
                containment_percent,
            } => match weighted_fire_area(*area_acres, *containment_percent) {
                Some(score) => {
                    let tier = match &self.wildfire {
                        Some(thresholds) if score > 0.0 => thresholds.tier_for(score),
                        _ => SeverityTier::Low,
                    };
                    Classification::classified(tier, score)
                }
                None => Classification::unclassified(),
            },
            RawSeverity::AlertLevel { level } => {
                match level.as_deref().and_then(alert_ordinal) {
                    Some(ordinal) => {
                        Classification::classified(ordinal_tier(ordinal), f64::from(ordinal))
                    }
                    None => Classification::unclassified(),
                }
            }
        }
    }

    /// Turn a normalized record into a stored record.
    pub fn apply(&self, normalized: NormalizedDisaster) -> DisasterRecord {
        let classification = self.classify(&normalized.raw);
        let risk_tier = self.risk_tier(&normalized.raw, normalized.depth_km);

        DisasterRecord {
            id: normalized.id,
            disaster_type: normalized.disaster_type,
            title: normalized.title,
            latitude: normalized.latitude,
            longitude: normalized.longitude,
            timestamp: normalized.timestamp,
            magnitude_or_severity_raw: normalized.raw,
            severity_tier: classification.tier,
            severity_score: classification.score,
            unclassified: classification.unclassified,
            risk_tier,
            region_tags: normalized.region_tags,
            depth_km: normalized.depth_km,
            url: normalized.url,
            source_name: normalized.source_name,
            retrieved_at: normalized.retrieved_at,
        }
    }
}
