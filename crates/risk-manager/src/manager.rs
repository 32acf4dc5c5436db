use analysis_core::{ConfigError, Direction, InputAnomaly, TechnicalSnapshot};

use crate::models::*;

/// ATR-driven stop-loss, position sizing, trailing-stop width and the entry
/// admission filter. Every method is a pure function of its inputs and the
/// parameters the manager was built with.
#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    params: RiskParameters,
}

impl RiskManager {
    /// Build a manager from checked parameters.
    pub fn new(params: RiskParameters) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn parameters(&self) -> &RiskParameters {
        &self.params
    }

    pub fn is_penny_stock(&self, price: f64) -> bool {
        price < self.params.penny_stock_price
    }

    /// Stop-loss percentage for a new position (always <= 0).
    pub fn stop_loss_percent(&self, entry_price: f64, atr: f64) -> f64 {
        self.assess_stop_loss(entry_price, atr).percent
    }

    /// Stop-loss with the ATR percentage it was derived from and any input
    /// anomaly that forced the fallback.
    pub fn assess_stop_loss(&self, entry_price: f64, atr: f64) -> StopLossAssessment {
        if let Some(anomaly) = entry_anomaly(entry_price).or_else(|| atr_anomaly(atr)) {
            tracing::warn!(
                "Stop loss fallback to {:.1}%: {}",
                self.params.default_stop_loss_percent,
                anomaly
            );
            return StopLossAssessment {
                percent: self.params.default_stop_loss_percent,
                atr_pct: 0.0,
                anomaly: Some(anomaly),
            };
        }

        let atr_pct = atr / entry_price * 100.0;
        let raw = -(atr_pct * self.params.atr_stop_multiplier);
        let widest = if self.is_penny_stock(entry_price) {
            self.params.penny_max_stop_loss_percent
        } else {
            self.params.standard_max_stop_loss_percent
        };
        let percent = raw.clamp(widest, self.params.min_stop_loss_percent);

        tracing::debug!(
            "Stop loss: entry=${:.4} atr={:.4} atr_pct={:.2}% raw={:.2}% -> {:.2}%",
            entry_price,
            atr,
            atr_pct,
            raw,
            percent
        );

        StopLossAssessment {
            percent,
            atr_pct,
            anomaly: None,
        }
    }

    /// Dollar size for a new position.
    pub fn position_size_dollars(&self, entry_price: f64, atr: f64) -> f64 {
        self.calculate_position_size(entry_price, atr).position_value
    }

    pub fn calculate_position_size(&self, entry_price: f64, atr: f64) -> PositionSizeCalculation {
        if let Some(anomaly) = entry_anomaly(entry_price) {
            tracing::warn!(
                "Position size fallback to ${:.0}: {}",
                self.params.min_position_size,
                anomaly
            );
            return PositionSizeCalculation {
                position_value: self.params.min_position_size,
                atr_pct: 0.0,
                volatility_multiplier: 0.0,
                penny_stock_adjusted: false,
                floored: true,
                anomaly: Some(anomaly),
            };
        }

        // Negative or NaN ATR sizes as if volatility were unknown (full size).
        let (atr_pct, anomaly) = match atr_anomaly(atr) {
            Some(a) if atr != 0.0 => (0.0, Some(a)),
            _ => (atr.max(0.0) / entry_price * 100.0, None),
        };

        let volatility_multiplier = self
            .params
            .atr_size_tiers
            .iter()
            .find(|tier| atr_pct > tier.above_atr_pct)
            .map(|tier| tier.multiplier)
            .unwrap_or(1.0);

        let mut size = self.params.base_position_size * volatility_multiplier;
        let penny_stock_adjusted = self.is_penny_stock(entry_price);
        if penny_stock_adjusted {
            size *= self.params.penny_size_multiplier;
        }

        let floored = size < self.params.min_position_size;
        let position_value = size.max(self.params.min_position_size);

        tracing::debug!(
            "Position size: entry=${:.4} atr_pct={:.2}% mult={:.2} penny={} -> ${:.2}",
            entry_price,
            atr_pct,
            volatility_multiplier,
            penny_stock_adjusted,
            position_value
        );

        PositionSizeCalculation {
            position_value,
            atr_pct,
            volatility_multiplier,
            penny_stock_adjusted,
            floored,
            anomaly,
        }
    }

    /// Distance (percent, > 0) the profit may fall from its peak before the
    /// trailing stop fires.
    pub fn trailing_stop_percent(&self, direction: Direction, entry_price: f64, atr: f64) -> f64 {
        if entry_anomaly(entry_price).is_some() || atr_anomaly(atr).is_some() {
            return self.params.default_trailing_stop_percent;
        }

        let atr_pct = atr / entry_price * 100.0;
        let base = (atr_pct * self.params.trailing_atr_multiplier).clamp(
            self.params.min_trailing_stop_percent,
            self.params.max_trailing_stop_percent,
        );

        match direction {
            Direction::Long => base,
            Direction::Short => (base * self.params.short_trailing_widening)
                .min(self.params.max_short_trailing_stop_percent),
        }
    }

    /// Peak profit (percent) a position must reach before trailing applies.
    pub fn trailing_activation_percent(&self, entry_price: f64) -> f64 {
        if self.is_penny_stock(entry_price) {
            self.params.penny_trailing_activation_percent
        } else {
            self.params.trailing_activation_percent
        }
    }

    /// Coarse pre-filter applied before any scoring: momentum band, trend
    /// strength, volume surge and a minimum price.
    pub fn check_admission(
        &self,
        price: f64,
        momentum_pct: f64,
        snapshot: &TechnicalSnapshot,
    ) -> Result<(), AdmissionRejection> {
        let p = &self.params;

        if !price.is_finite() || price < p.min_price {
            return Err(AdmissionRejection::PriceTooLow {
                price,
                min: p.min_price,
            });
        }

        let magnitude = momentum_pct.abs();
        if magnitude < p.min_momentum_percent {
            return Err(AdmissionRejection::MomentumTooWeak {
                momentum: momentum_pct,
                min: p.min_momentum_percent,
            });
        }
        if magnitude > p.max_momentum_percent {
            return Err(AdmissionRejection::MomentumTooStrong {
                momentum: momentum_pct,
                max: p.max_momentum_percent,
            });
        }

        if snapshot.adx < p.min_adx {
            return Err(AdmissionRejection::WeakTrend {
                adx: snapshot.adx,
                min: p.min_adx,
            });
        }

        if snapshot.volume <= snapshot.volume_sma * p.min_volume_multiple {
            return Err(AdmissionRejection::InsufficientVolume {
                volume: snapshot.volume,
                average: snapshot.volume_sma,
                multiple: p.min_volume_multiple,
            });
        }

        Ok(())
    }
}

fn entry_anomaly(entry_price: f64) -> Option<InputAnomaly> {
    if !entry_price.is_finite() {
        Some(InputAnomaly::NonFinite {
            field: "entry_price".to_string(),
        })
    } else if entry_price <= 0.0 {
        Some(InputAnomaly::NonPositiveEntryPrice { value: entry_price })
    } else {
        None
    }
}

fn atr_anomaly(atr: f64) -> Option<InputAnomaly> {
    if !atr.is_finite() {
        Some(InputAnomaly::NonFinite {
            field: "atr".to_string(),
        })
    } else if atr <= 0.0 {
        Some(InputAnomaly::NonPositiveAtr { value: atr })
    } else {
        None
    }
}
