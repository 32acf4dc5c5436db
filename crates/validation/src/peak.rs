use analysis_core::{Bar, ConfigError, InputAnomaly};
use serde::{Deserialize, Serialize};

use crate::config::PeakDetectionConfig;

/// How close the current price sits to the recent high.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakDetectionResult {
    pub peak_price: f64,
    pub current_price: f64,
    /// (peak - current) / peak, negative on a breakout above the window high
    pub distance_from_peak: f64,
    /// 1.0 at the peak, 0.0 once the distance reaches the normalizer
    pub proximity_score: f64,
    pub is_near_peak: bool,
    pub bars_considered: usize,
    pub skipped_bars: usize,
}

#[derive(Debug, Clone)]
pub struct PeakDetector {
    lookback_bars: usize,
    proximity_threshold: f64,
    distance_normalizer: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::from_validated(&PeakDetectionConfig::default())
    }
}

impl PeakDetector {
    /// Build from `config` after checking it.
    pub fn from_config(config: &PeakDetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: &PeakDetectionConfig) -> Self {
        Self {
            lookback_bars: config.lookback_bars,
            proximity_threshold: config.peak_proximity_threshold,
            distance_normalizer: config.peak_distance_normalizer,
        }
    }

    /// Score the current price against the highest high of the last
    /// `lookback_bars` well-formed bars.
    pub fn detect(
        &self,
        bars: &[Bar],
        current_price: f64,
    ) -> Result<PeakDetectionResult, InputAnomaly> {
        let start = bars.len().saturating_sub(self.lookback_bars);
        let window = &bars[start..];

        let mut skipped_bars = 0;
        let mut peak_price = f64::MIN;
        for bar in window {
            if bar.is_well_formed() {
                peak_price = peak_price.max(bar.high);
            } else {
                skipped_bars += 1;
            }
        }

        let bars_considered = window.len() - skipped_bars;
        if bars_considered == 0 {
            return Err(InputAnomaly::InsufficientBars {
                needed: 1,
                got: 0,
            });
        }

        let distance_from_peak = (peak_price - current_price) / peak_price;
        let proximity_score = self.proximity_score(distance_from_peak);

        Ok(PeakDetectionResult {
            peak_price,
            current_price,
            distance_from_peak,
            proximity_score,
            is_near_peak: proximity_score > self.proximity_threshold,
            bars_considered,
            skipped_bars,
        })
    }

    pub fn proximity_score(&self, distance_from_peak: f64) -> f64 {
        (1.0 - distance_from_peak / self.distance_normalizer).clamp(0.0, 1.0)
    }

    pub fn threshold(&self) -> f64 {
        self.proximity_threshold
    }
}
