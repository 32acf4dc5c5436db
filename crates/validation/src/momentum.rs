use analysis_core::{Bar, ConfigError, InputAnomaly};
use serde::{Deserialize, Serialize};

use crate::config::PeakDetectionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerationResult {
    /// Bar-over-bar percent change of the closes, oldest first
    pub momentum_values: Vec<f64>,
    /// Change between the last two momentum values, in percentage points
    pub acceleration: f64,
    /// acceleration / normalizer, clamped to [-1, 1]
    pub normalized_acceleration: f64,
    pub is_decelerating: bool,
    pub insufficient_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<InputAnomaly>,
}

impl AccelerationResult {
    fn flat(anomaly: InputAnomaly) -> Self {
        Self {
            momentum_values: Vec::new(),
            acceleration: 0.0,
            normalized_acceleration: 0.0,
            is_decelerating: false,
            insufficient_data: true,
            anomaly: Some(anomaly),
        }
    }
}

/// Detects momentum that is fading: still rising, but rising less each bar.
#[derive(Debug, Clone)]
pub struct MomentumAccelerationAnalyzer {
    momentum_bars: usize,
    deceleration_threshold: f64,
    normalizer: f64,
}

impl Default for MomentumAccelerationAnalyzer {
    fn default() -> Self {
        Self::from_validated(&PeakDetectionConfig::default())
    }
}

impl MomentumAccelerationAnalyzer {
    /// Build from `config` after checking it.
    pub fn from_config(config: &PeakDetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: &PeakDetectionConfig) -> Self {
        Self {
            momentum_bars: config.momentum_bars,
            deceleration_threshold: config.momentum_deceleration_threshold,
            normalizer: config.acceleration_normalizer,
        }
    }

    pub fn analyze(&self, bars: &[Bar]) -> AccelerationResult {
        if bars.len() < self.momentum_bars {
            return AccelerationResult::flat(InputAnomaly::InsufficientBars {
                needed: self.momentum_bars,
                got: bars.len(),
            });
        }

        let start = bars.len() - self.momentum_bars;
        let window = &bars[start..];
        if let Some(offset) = window.iter().position(|b| !(b.close.is_finite() && b.close > 0.0)) {
            return AccelerationResult::flat(InputAnomaly::MalformedBar {
                index: start + offset,
            });
        }

        let momentum_values: Vec<f64> = window
            .windows(2)
            .map(|pair| (pair[1].close - pair[0].close) / pair[0].close * 100.0)
            .collect();

        // momentum_bars >= 3 guarantees at least two momentum values
        let n = momentum_values.len();
        let acceleration = momentum_values[n - 1] - momentum_values[n - 2];
        let normalized_acceleration = (acceleration / self.normalizer).clamp(-1.0, 1.0);

        AccelerationResult {
            momentum_values,
            acceleration,
            normalized_acceleration,
            is_decelerating: acceleration < self.deceleration_threshold,
            insufficient_data: false,
            anomaly: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.deceleration_threshold
    }
}
