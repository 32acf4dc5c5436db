use analysis_core::{ensure_range, ConfigError};
use serde::{Deserialize, Serialize};

/// Inclusive RSI band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiBand {
    pub low: f64,
    pub high: f64,
}

impl RsiBand {
    pub fn contains(&self, rsi: f64) -> bool {
        rsi >= self.low && rsi <= self.high
    }
}

/// Gate and allocation thresholds for entry scoring. The per-factor scoring
/// curves are fixed; these are the knobs that decide admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryScoringConfig {
    pub min_trend_confirmations: usize,

    pub golden_min_reasons: usize,
    pub exceptional_score: f64,

    pub min_ema_strength_pct: f64,
    pub long_rsi_band: RsiBand,
    pub short_rsi_band: RsiBand,
    pub min_adx: f64,
    pub golden_min_adx: f64,
    pub min_volume_ratio: f64,
    pub golden_min_volume_ratio: f64,
    pub max_vwap_deviation_pct: f64,
    pub golden_max_vwap_deviation_pct: f64,
    pub max_vwap_premium_pct: f64,
    pub golden_max_vwap_premium_pct: f64,
    pub score_threshold: f64,
    pub golden_score_threshold: f64,

    pub base_allocation_factor: f64,
    pub max_allocation: f64,
    pub golden_allocation_multiplier: f64,
    pub max_golden_allocation: f64,
}

impl Default for EntryScoringConfig {
    fn default() -> Self {
        Self {
            min_trend_confirmations: 3,
            golden_min_reasons: 5,
            exceptional_score: 0.9,
            min_ema_strength_pct: 0.1,
            long_rsi_band: RsiBand { low: 40.0, high: 65.0 },
            short_rsi_band: RsiBand { low: 35.0, high: 60.0 },
            min_adx: 25.0,
            golden_min_adx: 32.0,
            min_volume_ratio: 1.2,
            golden_min_volume_ratio: 2.5,
            max_vwap_deviation_pct: 2.0,
            golden_max_vwap_deviation_pct: 3.5,
            max_vwap_premium_pct: 0.35,
            golden_max_vwap_premium_pct: 0.75,
            score_threshold: 0.75,
            golden_score_threshold: 0.70,
            base_allocation_factor: 0.05,
            max_allocation: 0.10,
            golden_allocation_multiplier: 1.2,
            max_golden_allocation: 0.15,
        }
    }
}

impl EntryScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_trend_confirmations > 5 {
            return Err(ConfigError::OutOfRange {
                field: "min_trend_confirmations",
                value: self.min_trend_confirmations as f64,
                expected: "0..=5",
            });
        }
        if self.golden_min_reasons > 6 {
            return Err(ConfigError::OutOfRange {
                field: "golden_min_reasons",
                value: self.golden_min_reasons as f64,
                expected: "0..=6",
            });
        }
        ensure_range("exceptional_score", self.exceptional_score, 0.0, 1.0, "0..=1")?;
        ensure_range("score_threshold", self.score_threshold, 0.0, 1.0, "0..=1")?;
        ensure_range("golden_score_threshold", self.golden_score_threshold, 0.0, 1.0, "0..=1")?;
        ensure_range("min_adx", self.min_adx, 0.0, 100.0, "0..=100")?;
        ensure_range("golden_min_adx", self.golden_min_adx, 0.0, 100.0, "0..=100")?;
        for band in [self.long_rsi_band, self.short_rsi_band] {
            ensure_range("rsi_band.low", band.low, 0.0, 100.0, "0..=100")?;
            ensure_range("rsi_band.high", band.high, band.low, 100.0, "low..=100")?;
        }
        ensure_range("max_allocation", self.max_allocation, 0.0, 0.15, "0..=0.15")?;
        ensure_range(
            "max_golden_allocation",
            self.max_golden_allocation,
            0.0,
            0.15,
            "0..=0.15",
        )?;
        Ok(())
    }
}

/// Thresholds for the exit rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub penny_stock_price: f64,
    /// Fractional stop (0.015 = 1.5%) below `penny_stock_price`
    pub penny_stop_loss: f64,
    pub standard_stop_loss: f64,
    pub long_rsi_extreme: f64,
    pub long_rsi_elevated: f64,
    pub short_rsi_extreme: f64,
    pub short_rsi_elevated: f64,
    pub long_max_vwap_deviation_pct: f64,
    pub short_max_vwap_deviation_pct: f64,
    pub weak_trend_adx: f64,
    pub profit_target_pct: f64,
    pub secure_profit_pct: f64,
    pub secure_profit_max_adx: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            penny_stock_price: 5.0,
            penny_stop_loss: 0.015,
            standard_stop_loss: 0.02,
            long_rsi_extreme: 80.0,
            long_rsi_elevated: 75.0,
            short_rsi_extreme: 20.0,
            short_rsi_elevated: 25.0,
            long_max_vwap_deviation_pct: 2.0,
            short_max_vwap_deviation_pct: 3.0,
            weak_trend_adx: 15.0,
            profit_target_pct: 3.0,
            secure_profit_pct: 2.0,
            secure_profit_max_adx: 20.0,
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_range("penny_stop_loss", self.penny_stop_loss, 0.0, 1.0, "0..=1")?;
        ensure_range("standard_stop_loss", self.standard_stop_loss, 0.0, 1.0, "0..=1")?;
        if self.secure_profit_pct > self.profit_target_pct {
            return Err(ConfigError::Ordering(
                "secure_profit_pct must not exceed profit_target_pct".to_string(),
            ));
        }
        Ok(())
    }
}
