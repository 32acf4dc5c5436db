use analysis_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::config::PeakDetectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    Rejected,
}

impl ConfidenceTier {
    pub fn multiplier(&self) -> f64 {
        match self {
            ConfidenceTier::High => 1.0,
            ConfidenceTier::Medium => 0.75,
            ConfidenceTier::Low => 0.5,
            ConfidenceTier::Rejected => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizeResult {
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub multiplier: f64,
    pub standard_size: f64,
    pub position_size: f64,
    pub floored: bool,
    pub stop_loss_percent: f64,
}

/// Scales the standard dollar size by a confidence tier.
#[derive(Debug, Clone)]
pub struct DynamicPositionSizer {
    high_threshold: f64,
    medium_threshold: f64,
    low_threshold: f64,
    min_position_size: f64,
    stop_loss_percent: f64,
}

impl Default for DynamicPositionSizer {
    fn default() -> Self {
        Self::from_validated(&PeakDetectionConfig::default())
    }
}

impl DynamicPositionSizer {
    /// Build from `config` after checking it.
    pub fn from_config(config: &PeakDetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: &PeakDetectionConfig) -> Self {
        Self {
            high_threshold: config.high_confidence_threshold,
            medium_threshold: config.medium_confidence_threshold,
            low_threshold: config.min_confidence_threshold,
            min_position_size: config.min_position_size,
            stop_loss_percent: config.stop_loss_percent,
        }
    }

    pub fn tier(&self, confidence: f64) -> ConfidenceTier {
        if confidence >= self.high_threshold {
            ConfidenceTier::High
        } else if confidence >= self.medium_threshold {
            ConfidenceTier::Medium
        } else if confidence >= self.low_threshold {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::Rejected
        }
    }

    pub fn size(&self, confidence: f64, standard_size: f64) -> PositionSizeResult {
        let tier = self.tier(confidence);
        let multiplier = tier.multiplier();

        let scaled = (standard_size * multiplier).max(0.0);
        let (position_size, floored) = if multiplier > 0.0 && scaled < self.min_position_size {
            (self.min_position_size, true)
        } else {
            (scaled, false)
        };

        PositionSizeResult {
            confidence,
            tier,
            multiplier,
            standard_size,
            position_size,
            floored,
            stop_loss_percent: self.stop_loss_percent,
        }
    }
}
