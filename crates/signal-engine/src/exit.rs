//! Exit decision engine
//!
//! Every rule is evaluated; the position exits when at least one fires.

use analysis_core::{ConfigError, Direction, InputAnomaly, TechnicalSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ExitConfig;

/// One reason to close a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss { profit_pct: f64 },
    MacdReversal,
    RsiExtreme { rsi: f64 },
    RsiReversal { rsi: f64 },
    VwapBreak { deviation_pct: f64 },
    WeakTrend { adx: f64 },
    ProfitTarget { profit_pct: f64 },
    SecureProfit { profit_pct: f64, adx: f64 },
    /// Raised by the position lifecycle, not by the rule set below
    TrailingStop {
        peak_profit_pct: f64,
        profit_pct: f64,
        trailing_stop_pct: f64,
    },
    /// Raised by the position lifecycle, not by the rule set below
    DynamicStopLoss { profit_pct: f64, stop_pct: f64 },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss { profit_pct } => {
                write!(f, "Stop loss triggered: {profit_pct:.2}%")
            }
            ExitReason::MacdReversal => f.write_str("MACD reversal with EMA cross reversed"),
            ExitReason::RsiExtreme { rsi } => write!(f, "RSI extreme: {rsi:.1}"),
            ExitReason::RsiReversal { rsi } => {
                write!(f, "RSI elevated ({rsi:.1}) with MACD histogram against position")
            }
            ExitReason::VwapBreak { deviation_pct } => {
                write!(f, "Price {deviation_pct:.2}% from VWAP against position")
            }
            ExitReason::WeakTrend { adx } => write!(f, "Weak trend: ADX {adx:.1}"),
            ExitReason::ProfitTarget { profit_pct } => {
                write!(f, "Profit target reached: {profit_pct:.2}%")
            }
            ExitReason::SecureProfit { profit_pct, adx } => write!(
                f,
                "Securing {profit_pct:.2}% profit on weakening trend (ADX {adx:.1})"
            ),
            ExitReason::TrailingStop {
                peak_profit_pct,
                profit_pct,
                trailing_stop_pct,
            } => write!(
                f,
                "Trailing stop: profit {profit_pct:.2}% fell {:.2}% from peak {peak_profit_pct:.2}% (trail {trailing_stop_pct:.2}%)",
                peak_profit_pct - profit_pct
            ),
            ExitReason::DynamicStopLoss {
                profit_pct,
                stop_pct,
            } => write!(f, "Dynamic stop loss: {profit_pct:.2}% <= {stop_pct:.2}%"),
        }
    }
}

impl ExitReason {
    /// Stable label, matching the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ExitReason::StopLoss { .. } => "stop_loss",
            ExitReason::MacdReversal => "macd_reversal",
            ExitReason::RsiExtreme { .. } => "rsi_extreme",
            ExitReason::RsiReversal { .. } => "rsi_reversal",
            ExitReason::VwapBreak { .. } => "vwap_break",
            ExitReason::WeakTrend { .. } => "weak_trend",
            ExitReason::ProfitTarget { .. } => "profit_target",
            ExitReason::SecureProfit { .. } => "secure_profit",
            ExitReason::TrailingStop { .. } => "trailing_stop",
            ExitReason::DynamicStopLoss { .. } => "dynamic_stop_loss",
        }
    }
}

/// Joins reasons the way they are reported downstream.
pub fn join_reasons(reasons: &[ExitReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvaluation {
    pub exit_decision: bool,
    pub reason: String,
    pub reasons: Vec<ExitReason>,
    pub profit_pct: f64,
    /// Fractional stop applied (0.02 = 2%)
    pub stop_loss_pct: f64,
    pub stop_loss_price: f64,
    pub anomaly: Option<InputAnomaly>,
}

#[derive(Debug, Clone, Default)]
pub struct ExitEvaluator {
    config: ExitConfig,
}

impl ExitEvaluator {
    pub fn new(config: ExitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Fractional stop for the current price.
    pub fn stop_loss_fraction(&self, current_price: f64) -> f64 {
        if current_price < self.config.penny_stock_price {
            self.config.penny_stop_loss
        } else {
            self.config.standard_stop_loss
        }
    }

    /// Evaluate at the snapshot's close.
    pub fn evaluate(
        &self,
        direction: Direction,
        enter_price: f64,
        snap: &TechnicalSnapshot,
    ) -> ExitEvaluation {
        self.evaluate_at(direction, enter_price, snap.close_price, snap)
    }

    /// Evaluate at an explicit price (e.g. the quote side the position would
    /// exit on), taking indicators from `snap`.
    pub fn evaluate_at(
        &self,
        direction: Direction,
        enter_price: f64,
        current_price: f64,
        snap: &TechnicalSnapshot,
    ) -> ExitEvaluation {
        let cfg = &self.config;
        let sign = direction.sign();

        let anomaly = if enter_price.is_nan() || enter_price <= 0.0 {
            Some(InputAnomaly::NonPositiveEntryPrice { value: enter_price })
        } else if !current_price.is_finite() {
            Some(InputAnomaly::NonFinite {
                field: "current_price".to_string(),
            })
        } else {
            None
        };

        let profit_pct = if anomaly.is_none() {
            (current_price - enter_price) / enter_price * 100.0 * sign
        } else {
            0.0
        };
        let stop_loss_pct = self.stop_loss_fraction(current_price);
        let stop_loss_price = if anomaly.is_none() {
            enter_price * (1.0 - stop_loss_pct * sign)
        } else {
            0.0
        };

        let mut reasons = Vec::new();

        if anomaly.is_none() && profit_pct < -stop_loss_pct * 100.0 {
            reasons.push(ExitReason::StopLoss { profit_pct });
        }

        let m = &snap.macd;
        let hist_against = m.histogram * sign < 0.0;
        let macd_against = (m.macd - m.signal) * sign < 0.0;
        let ema_against = (snap.ema_fast - snap.ema_slow) * sign < 0.0;
        if hist_against && macd_against && ema_against {
            reasons.push(ExitReason::MacdReversal);
        }

        let (extreme, elevated) = match direction {
            Direction::Long => (
                snap.rsi > cfg.long_rsi_extreme,
                snap.rsi > cfg.long_rsi_elevated,
            ),
            Direction::Short => (
                snap.rsi < cfg.short_rsi_extreme,
                snap.rsi < cfg.short_rsi_elevated,
            ),
        };
        if extreme {
            reasons.push(ExitReason::RsiExtreme { rsi: snap.rsi });
        } else if elevated && hist_against {
            reasons.push(ExitReason::RsiReversal { rsi: snap.rsi });
        }

        if snap.vwap > 0.0 {
            let deviation_pct = (current_price - snap.vwap) / snap.vwap * 100.0;
            let broken = match direction {
                Direction::Long => deviation_pct < -cfg.long_max_vwap_deviation_pct,
                Direction::Short => deviation_pct > cfg.short_max_vwap_deviation_pct,
            };
            if broken {
                reasons.push(ExitReason::VwapBreak { deviation_pct });
            }
        }

        if snap.adx < cfg.weak_trend_adx {
            reasons.push(ExitReason::WeakTrend { adx: snap.adx });
        }

        if profit_pct >= cfg.profit_target_pct {
            reasons.push(ExitReason::ProfitTarget { profit_pct });
        } else if profit_pct >= cfg.secure_profit_pct && snap.adx < cfg.secure_profit_max_adx {
            reasons.push(ExitReason::SecureProfit {
                profit_pct,
                adx: snap.adx,
            });
        }

        let exit_decision = !reasons.is_empty();
        let reason = join_reasons(&reasons);

        if exit_decision {
            tracing::info!(
                "{} exit signalled at ${:.4} ({:+.2}%): {}",
                direction,
                current_price,
                profit_pct,
                reason
            );
        } else {
            tracing::debug!(
                "{} hold at ${:.4} ({:+.2}%), stop ${:.4}",
                direction,
                current_price,
                profit_pct,
                stop_loss_price
            );
        }

        ExitEvaluation {
            exit_decision,
            reason,
            reasons,
            profit_pct,
            stop_loss_pct,
            stop_loss_price,
            anomaly,
        }
    }
}
