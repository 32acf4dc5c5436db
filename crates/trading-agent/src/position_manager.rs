use analysis_core::{Direction, TechnicalSnapshot};
use chrono::{DateTime, Utc};
use risk_manager::{profit_loss_percent, RiskManager};
use serde::{Deserialize, Serialize};
use signal_engine::{join_reasons, ExitEvaluator, ExitReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Peak profit has not reached the activation threshold yet
    PreActivation,
    TrailingActive,
    Closed,
}

/// One live trade, read-modify-written once per exit cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticker: String,
    pub direction: Direction,
    pub enter_price: f64,
    pub created_at: DateTime<Utc>,
    pub peak_profit_percent: f64,
    pub trailing_stop_percent: f64,
    pub trailing_activation_percent: f64,
    /// Hard stop (negative percent) computed at entry
    pub dynamic_stop_loss_percent: f64,
    pub status: PositionStatus,
    pub last_profit_percent: f64,
    pub cycles: u64,
    pub close_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Result of one exit cycle on a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PositionUpdate {
    Held {
        profit_pct: f64,
        peak_profit_percent: f64,
        trailing_stop_percent: f64,
        status: PositionStatus,
    },
    Closed {
        profit_pct: f64,
        reasons: Vec<ExitReason>,
        reason: String,
    },
    /// The position was already closed; nothing changed
    AlreadyClosed { reason: String },
}

impl PositionUpdate {
    pub fn is_exit(&self) -> bool {
        matches!(self, PositionUpdate::Closed { .. })
    }
}

impl OpenPosition {
    pub fn open(
        ticker: impl Into<String>,
        direction: Direction,
        enter_price: f64,
        atr: f64,
        risk: &RiskManager,
    ) -> Self {
        let ticker = ticker.into();
        let position = Self {
            direction,
            enter_price,
            created_at: Utc::now(),
            peak_profit_percent: 0.0,
            trailing_stop_percent: risk.trailing_stop_percent(direction, enter_price, atr),
            trailing_activation_percent: risk.trailing_activation_percent(enter_price),
            dynamic_stop_loss_percent: risk.stop_loss_percent(enter_price, atr),
            status: PositionStatus::PreActivation,
            last_profit_percent: 0.0,
            cycles: 0,
            close_reason: None,
            closed_at: None,
            ticker,
        };

        tracing::info!(
            "Opened {} {} @ ${:.4} (stop {:.2}%, trail {:.2}% after +{:.2}%)",
            position.direction,
            position.ticker,
            position.enter_price,
            position.dynamic_stop_loss_percent,
            position.trailing_stop_percent,
            position.trailing_activation_percent
        );
        position
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Advance the lifecycle by one cycle at `exit_price` (the quote side the
    /// position would close on). `snapshot` supplies ATR and the indicators
    /// the exit rules read.
    pub fn update(
        &mut self,
        exit_price: f64,
        snapshot: &TechnicalSnapshot,
        risk: &RiskManager,
        exit_evaluator: &ExitEvaluator,
    ) -> PositionUpdate {
        if self.is_closed() {
            return PositionUpdate::AlreadyClosed {
                reason: self.close_reason.clone().unwrap_or_default(),
            };
        }

        self.cycles += 1;
        let profit_pct = profit_loss_percent(self.direction, self.enter_price, exit_price);
        self.last_profit_percent = profit_pct;

        if profit_pct > self.peak_profit_percent {
            self.peak_profit_percent = profit_pct;
            self.trailing_stop_percent =
                risk.trailing_stop_percent(self.direction, self.enter_price, snapshot.atr);
            tracing::debug!(
                "{} new peak {:.2}%, trail {:.2}%",
                self.ticker,
                self.peak_profit_percent,
                self.trailing_stop_percent
            );
        }

        if self.status == PositionStatus::PreActivation
            && self.peak_profit_percent >= self.trailing_activation_percent
        {
            self.status = PositionStatus::TrailingActive;
            tracing::info!(
                "{} trailing stop armed at peak {:.2}%",
                self.ticker,
                self.peak_profit_percent
            );
        }

        let mut reasons = Vec::new();

        if self.status == PositionStatus::TrailingActive
            && self.peak_profit_percent - profit_pct >= self.trailing_stop_percent
        {
            reasons.push(ExitReason::TrailingStop {
                peak_profit_pct: self.peak_profit_percent,
                profit_pct,
                trailing_stop_pct: self.trailing_stop_percent,
            });
        }

        if profit_pct <= self.dynamic_stop_loss_percent {
            reasons.push(ExitReason::DynamicStopLoss {
                profit_pct,
                stop_pct: self.dynamic_stop_loss_percent,
            });
        }

        let evaluation =
            exit_evaluator.evaluate_at(self.direction, self.enter_price, exit_price, snapshot);
        reasons.extend(evaluation.reasons);

        if reasons.is_empty() {
            return PositionUpdate::Held {
                profit_pct,
                peak_profit_percent: self.peak_profit_percent,
                trailing_stop_percent: self.trailing_stop_percent,
                status: self.status,
            };
        }

        let reason = join_reasons(&reasons);
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason.clone());
        self.closed_at = Some(Utc::now());
        tracing::info!(
            "Closing {} {} at {:+.2}% (peak {:.2}%): {}",
            self.direction,
            self.ticker,
            profit_pct,
            self.peak_profit_percent,
            reason
        );

        PositionUpdate::Closed {
            profit_pct,
            reasons,
            reason,
        }
    }
}
