use analysis_core::{ensure_non_positive, ensure_range, ConfigError, InputAnomaly};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ATR-percentage tier for position sizing: when `atr_pct > above_atr_pct`
/// the base size is scaled by `multiplier`. Tiers are checked in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrSizeTier {
    pub above_atr_pct: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParameters {
    /// Fallback stop when entry price or ATR is unusable (percent, <= 0)
    pub default_stop_loss_percent: f64,
    /// ATR percentage is multiplied by this to get the raw stop distance
    pub atr_stop_multiplier: f64,
    /// Prices strictly below this are treated as penny stocks
    pub penny_stock_price: f64,
    /// Tightest stop allowed (percent, <= 0)
    pub min_stop_loss_percent: f64,
    /// Widest stop for penny stocks (percent, <= 0)
    pub penny_max_stop_loss_percent: f64,
    /// Widest stop for everything else (percent, <= 0)
    pub standard_max_stop_loss_percent: f64,

    pub base_position_size: f64,
    pub min_position_size: f64,
    pub penny_size_multiplier: f64,
    pub atr_size_tiers: Vec<AtrSizeTier>,

    // Entry admission filter
    pub min_momentum_percent: f64,
    pub max_momentum_percent: f64,
    pub min_adx: f64,
    pub min_volume_multiple: f64,
    pub min_price: f64,

    // Trailing stop width
    pub trailing_atr_multiplier: f64,
    pub min_trailing_stop_percent: f64,
    pub max_trailing_stop_percent: f64,
    pub short_trailing_widening: f64,
    pub max_short_trailing_stop_percent: f64,
    pub default_trailing_stop_percent: f64,

    // Trailing stop activation (peak profit needed before trailing applies)
    pub trailing_activation_percent: f64,
    pub penny_trailing_activation_percent: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            default_stop_loss_percent: -4.0,
            atr_stop_multiplier: 2.0,
            penny_stock_price: 5.0,
            min_stop_loss_percent: -4.0,
            penny_max_stop_loss_percent: -8.0,
            standard_max_stop_loss_percent: -6.0,
            base_position_size: 2000.0,
            min_position_size: 500.0,
            penny_size_multiplier: 0.75,
            atr_size_tiers: vec![
                AtrSizeTier { above_atr_pct: 5.0, multiplier: 0.25 },
                AtrSizeTier { above_atr_pct: 4.0, multiplier: 0.35 },
                AtrSizeTier { above_atr_pct: 3.0, multiplier: 0.5 },
                AtrSizeTier { above_atr_pct: 2.5, multiplier: 0.75 },
            ],
            min_momentum_percent: 1.5,
            max_momentum_percent: 15.0,
            min_adx: 20.0,
            min_volume_multiple: 1.5,
            min_price: 0.10,
            trailing_atr_multiplier: 1.5,
            min_trailing_stop_percent: 1.0,
            max_trailing_stop_percent: 3.0,
            short_trailing_widening: 1.5,
            max_short_trailing_stop_percent: 4.0,
            default_trailing_stop_percent: 2.0,
            trailing_activation_percent: 1.0,
            penny_trailing_activation_percent: 0.5,
        }
    }
}

impl RiskParameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_non_positive("default_stop_loss_percent", self.default_stop_loss_percent)?;
        ensure_non_positive("min_stop_loss_percent", self.min_stop_loss_percent)?;
        ensure_non_positive("penny_max_stop_loss_percent", self.penny_max_stop_loss_percent)?;
        ensure_non_positive(
            "standard_max_stop_loss_percent",
            self.standard_max_stop_loss_percent,
        )?;
        if self.penny_max_stop_loss_percent > self.min_stop_loss_percent
            || self.standard_max_stop_loss_percent > self.min_stop_loss_percent
        {
            return Err(ConfigError::Ordering(
                "max stop-loss bounds must be at or below min_stop_loss_percent".to_string(),
            ));
        }

        ensure_range("atr_stop_multiplier", self.atr_stop_multiplier, 0.0, 10.0, "0..=10")?;
        ensure_range("penny_stock_price", self.penny_stock_price, 0.0, 1_000.0, "0..=1000")?;
        ensure_range("base_position_size", self.base_position_size, 0.0, f64::MAX, ">= 0")?;
        ensure_range(
            "min_position_size",
            self.min_position_size,
            0.0,
            self.base_position_size,
            "0..=base_position_size",
        )?;
        ensure_range("penny_size_multiplier", self.penny_size_multiplier, 0.0, 1.0, "0..=1")?;
        for tier in &self.atr_size_tiers {
            ensure_range("atr_size_tiers.multiplier", tier.multiplier, 0.0, 1.0, "0..=1")?;
        }

        if self.min_momentum_percent > self.max_momentum_percent {
            return Err(ConfigError::Ordering(
                "min_momentum_percent must not exceed max_momentum_percent".to_string(),
            ));
        }
        ensure_range("min_adx", self.min_adx, 0.0, 100.0, "0..=100")?;
        ensure_range("min_price", self.min_price, 0.0, f64::MAX, ">= 0")?;

        if self.min_trailing_stop_percent > self.max_trailing_stop_percent {
            return Err(ConfigError::Ordering(
                "min_trailing_stop_percent must not exceed max_trailing_stop_percent".to_string(),
            ));
        }
        ensure_range(
            "trailing_activation_percent",
            self.trailing_activation_percent,
            0.0,
            100.0,
            "0..=100",
        )?;
        ensure_range(
            "penny_trailing_activation_percent",
            self.penny_trailing_activation_percent,
            0.0,
            100.0,
            "0..=100",
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossAssessment {
    /// Stop-loss as a negative percentage of entry
    pub percent: f64,
    pub atr_pct: f64,
    pub anomaly: Option<InputAnomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizeCalculation {
    pub position_value: f64,
    pub atr_pct: f64,
    pub volatility_multiplier: f64,
    pub penny_stock_adjusted: bool,
    pub floored: bool,
    pub anomaly: Option<InputAnomaly>,
}

/// Why the entry admission filter turned a candidate away.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionRejection {
    #[error("momentum {momentum:.2}% below minimum {min:.2}%")]
    MomentumTooWeak { momentum: f64, min: f64 },

    #[error("momentum {momentum:.2}% above maximum {max:.2}%")]
    MomentumTooStrong { momentum: f64, max: f64 },

    #[error("ADX {adx:.1} below minimum {min:.1}")]
    WeakTrend { adx: f64, min: f64 },

    #[error("volume {volume:.0} not above {multiple:.1}x average {average:.0}")]
    InsufficientVolume {
        volume: f64,
        average: f64,
        multiple: f64,
    },

    #[error("price ${price:.4} below minimum ${min:.2}")]
    PriceTooLow { price: f64, min: f64 },
}
