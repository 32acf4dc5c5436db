use serde::{Deserialize, Serialize};

use crate::config::{PeakDetectionConfig, WEIGHT_SUM_TOLERANCE};
use crate::momentum::AccelerationResult;
use crate::peak::PeakDetectionResult;
use crate::volume::VolumeAnalysis;

/// Raw momentum (percent) at which the momentum factor starts contributing.
const MOMENTUM_FLOOR_PCT: f64 = 5.0;
/// Span above the floor over which the momentum factor rises from 0 to 1.
const MOMENTUM_SPAN_PCT: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub momentum: f64,
    pub peak: f64,
    pub volume: f64,
    pub acceleration: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            momentum: 0.25,
            peak: 0.25,
            volume: 0.25,
            acceleration: 0.25,
        }
    }
}

impl ConfidenceWeights {
    pub fn from_config(config: &PeakDetectionConfig) -> Self {
        Self {
            momentum: config.momentum_weight,
            peak: config.peak_weight,
            volume: config.volume_weight,
            acceleration: config.acceleration_weight,
        }
    }

    pub fn sum(&self) -> f64 {
        self.momentum + self.peak + self.volume + self.acceleration
    }

    fn differs_from(&self, other: &ConfidenceWeights) -> bool {
        [
            (self.momentum, other.momentum),
            (self.peak, other.peak),
            (self.volume, other.volume),
            (self.acceleration, other.acceleration),
        ]
        .iter()
        .any(|(a, b)| (a - b).abs() > WEIGHT_SUM_TOLERANCE)
    }
}

/// Each factor already mapped onto [0, 1], before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    pub momentum: f64,
    pub peak: f64,
    pub volume: f64,
    pub acceleration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub confidence: f64,
    pub components: ConfidenceComponents,
    pub weights: ConfidenceWeights,
    pub meets_threshold: bool,
}

#[derive(Debug, Clone)]
pub struct EnhancedConfidenceCalculator {
    weights: ConfidenceWeights,
    min_confidence: f64,
}

impl Default for EnhancedConfidenceCalculator {
    /// Equal weights. Pipelines build their calculator from the config instead.
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            min_confidence: 0.5,
        }
    }
}

impl EnhancedConfidenceCalculator {
    pub fn new(weights: ConfidenceWeights, min_confidence: f64) -> Self {
        Self {
            weights,
            min_confidence,
        }
    }

    pub fn from_config(config: &PeakDetectionConfig) -> Self {
        Self::new(
            ConfidenceWeights::from_config(config),
            config.min_confidence_threshold,
        )
    }

    pub fn weights(&self) -> &ConfidenceWeights {
        &self.weights
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// True when these weights are not the ones the config carries.
    pub fn weights_diverge_from_config(&self, config: &PeakDetectionConfig) -> bool {
        self.weights
            .differs_from(&ConfidenceWeights::from_config(config))
    }

    pub fn momentum_factor(raw_momentum: f64) -> f64 {
        if !raw_momentum.is_finite() {
            return 0.0;
        }
        ((raw_momentum - MOMENTUM_FLOOR_PCT) / MOMENTUM_SPAN_PCT).clamp(0.0, 1.0)
    }

    pub fn calculate(
        &self,
        raw_momentum: f64,
        peak: &PeakDetectionResult,
        volume: &VolumeAnalysis,
        acceleration: &AccelerationResult,
    ) -> ConfidenceResult {
        let components = ConfidenceComponents {
            momentum: Self::momentum_factor(raw_momentum),
            peak: 1.0 - peak.proximity_score,
            volume: volume.confirmation_score,
            acceleration: (acceleration.normalized_acceleration + 1.0) / 2.0,
        };

        let w = &self.weights;
        let confidence = (components.momentum * w.momentum
            + components.peak * w.peak
            + components.volume * w.volume
            + components.acceleration * w.acceleration)
            .clamp(0.0, 1.0);

        ConfidenceResult {
            confidence,
            components,
            weights: *w,
            meets_threshold: confidence >= self.min_confidence,
        }
    }
}
