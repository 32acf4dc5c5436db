use std::path::Path;

use analysis_core::{ensure_non_positive, ensure_range, ConfigError};
use serde::{Deserialize, Serialize};

/// Tolerance on the confidence weight sum.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Every threshold, weight and lookback window of the enhanced validation
/// pipeline. Load it once, validate it, then share it read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectionConfig {
    /// When false the pipeline admits everything without running any stage
    pub enabled: bool,

    // Peak detection
    pub lookback_bars: usize,
    /// Reject when the proximity score is above this
    pub peak_proximity_threshold: f64,
    /// Distance from peak (fraction) at which the proximity score reaches 0
    pub peak_distance_normalizer: f64,

    // Volume confirmation
    pub volume_lookback_bars: usize,
    pub high_volume_multiplier: f64,
    /// Minimum score for a standalone volume check; the pipeline uses 0
    pub min_volume_score: f64,

    // Momentum acceleration
    pub momentum_bars: usize,
    /// Acceleration (percentage points) below which momentum counts as decelerating
    pub momentum_deceleration_threshold: f64,
    pub acceleration_normalizer: f64,

    // Confidence
    pub min_confidence_threshold: f64,
    pub momentum_weight: f64,
    pub peak_weight: f64,
    pub volume_weight: f64,
    pub acceleration_weight: f64,

    // Position sizing
    pub high_confidence_threshold: f64,
    pub medium_confidence_threshold: f64,
    pub min_position_size: f64,
    /// Stop attached to admitted positions (percent, <= 0)
    pub stop_loss_percent: f64,
}

impl Default for PeakDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_bars: 10,
            peak_proximity_threshold: 0.80,
            peak_distance_normalizer: 0.03,
            volume_lookback_bars: 20,
            high_volume_multiplier: 1.5,
            min_volume_score: 0.0,
            momentum_bars: 4,
            momentum_deceleration_threshold: -2.0,
            acceleration_normalizer: 5.0,
            min_confidence_threshold: 0.5,
            momentum_weight: 0.25,
            peak_weight: 0.25,
            volume_weight: 0.30,
            acceleration_weight: 0.20,
            high_confidence_threshold: 0.8,
            medium_confidence_threshold: 0.65,
            min_position_size: 50.0,
            stop_loss_percent: -4.0,
        }
    }
}

impl PeakDetectionConfig {
    /// Parse and validate a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn weight_sum(&self) -> f64 {
        self.momentum_weight + self.peak_weight + self.volume_weight + self.acceleration_weight
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_count("lookback_bars", self.lookback_bars, 1)?;
        ensure_count("volume_lookback_bars", self.volume_lookback_bars, 2)?;
        ensure_count("momentum_bars", self.momentum_bars, 3)?;

        ensure_range(
            "peak_proximity_threshold",
            self.peak_proximity_threshold,
            0.0,
            1.0,
            "0..=1",
        )?;
        ensure_positive("peak_distance_normalizer", self.peak_distance_normalizer)?;
        ensure_positive("high_volume_multiplier", self.high_volume_multiplier)?;
        ensure_range("min_volume_score", self.min_volume_score, 0.0, 1.0, "0..=1")?;
        ensure_range(
            "momentum_deceleration_threshold",
            self.momentum_deceleration_threshold,
            -100.0,
            0.0,
            "-100..=0",
        )?;
        ensure_positive("acceleration_normalizer", self.acceleration_normalizer)?;

        for (field, weight) in [
            ("momentum_weight", self.momentum_weight),
            ("peak_weight", self.peak_weight),
            ("volume_weight", self.volume_weight),
            ("acceleration_weight", self.acceleration_weight),
        ] {
            ensure_range(field, weight, 0.0, 1.0, "0..=1")?;
        }
        let sum = self.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }

        ensure_range(
            "min_confidence_threshold",
            self.min_confidence_threshold,
            0.0,
            1.0,
            "0..=1",
        )?;
        ensure_range(
            "medium_confidence_threshold",
            self.medium_confidence_threshold,
            0.0,
            1.0,
            "0..=1",
        )?;
        ensure_range(
            "high_confidence_threshold",
            self.high_confidence_threshold,
            0.0,
            1.0,
            "0..=1",
        )?;
        if !(self.min_confidence_threshold <= self.medium_confidence_threshold
            && self.medium_confidence_threshold <= self.high_confidence_threshold)
        {
            return Err(ConfigError::Ordering(format!(
                "expected min ({}) <= medium ({}) <= high ({}) confidence",
                self.min_confidence_threshold,
                self.medium_confidence_threshold,
                self.high_confidence_threshold
            )));
        }

        ensure_range("min_position_size", self.min_position_size, 0.0, f64::MAX, ">= 0")?;
        ensure_non_positive("stop_loss_percent", self.stop_loss_percent)?;
        Ok(())
    }
}

fn ensure_count(field: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            expected: "at least the minimum window for this stage",
        })
    }
}

fn ensure_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "> 0",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = PeakDetectionConfig::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.weight_sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE);
    }

    #[test]
    fn test_weight_sum_checked() {
        let cfg = PeakDetectionConfig {
            volume_weight: 0.35,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::WeightSum { .. })));

        // within tolerance
        let cfg = PeakDetectionConfig {
            volume_weight: 0.3005,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_positive_stop_loss_rejected() {
        let cfg = PeakDetectionConfig {
            stop_loss_percent: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PositiveStopLoss { field: "stop_loss_percent", .. })
        ));
    }

    #[test]
    fn test_threshold_ordering() {
        let cfg = PeakDetectionConfig {
            medium_confidence_threshold: 0.9,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Ordering(_))));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = PeakDetectionConfig::from_json_str(r#"{"lookback_bars": 15}"#).unwrap();
        assert_eq!(cfg.lookback_bars, 15);
        assert_eq!(cfg.volume_lookback_bars, 20);

        let err = PeakDetectionConfig::from_json_str(r#"{"peak_weight": 0.9}"#).unwrap_err();
        assert!(err.to_string().contains("confidence weights"));

        assert!(matches!(
            PeakDetectionConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_window_minimums() {
        let cfg = PeakDetectionConfig {
            momentum_bars: 2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
