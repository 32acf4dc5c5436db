use analysis_core::{Bar, ConfigError, InputAnomaly};
use serde::{Deserialize, Serialize};

use crate::config::PeakDetectionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub current_volume: f64,
    /// Mean of the window excluding the current bar
    pub average_volume: f64,
    pub volume_ratio: f64,
    pub confirmation_score: f64,
    pub is_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<InputAnomaly>,
}

impl VolumeAnalysis {
    fn unconfirmed(current_volume: f64, average_volume: f64, anomaly: InputAnomaly) -> Self {
        Self {
            current_volume,
            average_volume,
            volume_ratio: 0.0,
            confirmation_score: 0.0,
            is_confirmed: false,
            anomaly: Some(anomaly),
        }
    }
}

/// Compares the latest bar's volume against the trailing average.
#[derive(Debug, Clone)]
pub struct VolumeAnalyzer {
    lookback_bars: usize,
    high_volume_multiplier: f64,
    min_score: f64,
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::from_validated(&PeakDetectionConfig::default())
    }
}

impl VolumeAnalyzer {
    /// Build from `config` after checking it.
    pub fn from_config(config: &PeakDetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: &PeakDetectionConfig) -> Self {
        Self {
            lookback_bars: config.volume_lookback_bars,
            high_volume_multiplier: config.high_volume_multiplier,
            min_score: config.min_volume_score,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn analyze(&self, bars: &[Bar]) -> VolumeAnalysis {
        let start = bars.len().saturating_sub(self.lookback_bars);
        let window = &bars[start..];

        let Some((current, history)) = window.split_last() else {
            return VolumeAnalysis::unconfirmed(
                0.0,
                0.0,
                InputAnomaly::InsufficientBars { needed: 2, got: 0 },
            );
        };
        if history.is_empty() {
            return VolumeAnalysis::unconfirmed(
                current.volume,
                0.0,
                InputAnomaly::InsufficientBars { needed: 2, got: 1 },
            );
        }

        let average_volume = history.iter().map(|b| b.volume).sum::<f64>() / history.len() as f64;
        if !average_volume.is_finite() || !current.volume.is_finite() {
            return VolumeAnalysis::unconfirmed(
                current.volume,
                average_volume,
                InputAnomaly::NonFinite {
                    field: "volume".to_string(),
                },
            );
        }
        if average_volume <= 0.0 {
            return VolumeAnalysis::unconfirmed(
                current.volume,
                average_volume,
                InputAnomaly::ZeroAverageVolume,
            );
        }

        let volume_ratio = current.volume / average_volume;
        let confirmation_score = (volume_ratio / self.high_volume_multiplier).clamp(0.0, 1.0);

        VolumeAnalysis {
            current_volume: current.volume,
            average_volume,
            volume_ratio,
            confirmation_score,
            is_confirmed: confirmation_score >= self.min_score,
            anomaly: None,
        }
    }
}
