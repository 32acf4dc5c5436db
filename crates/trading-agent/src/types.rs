use analysis_core::Direction;
use risk_manager::AdmissionRejection;
use serde::{Deserialize, Serialize};
use signal_engine::{EntryRejection, EntrySignal};
use thiserror::Error;
use validation::{ValidationRejection, ValidationResult};

use crate::position_manager::PositionUpdate;

/// Everything needed to place an entry order and then open the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDecision {
    pub ticker: String,
    pub direction: Direction,
    pub signal: EntrySignal,
    /// Ask for longs, bid for shorts
    pub entry_price: f64,
    pub atr: f64,
    /// Negative percent
    pub stop_loss_percent: f64,
    pub stop_loss_price: f64,
    /// Dollar size (validated size when the pipeline ran)
    pub position_size: f64,
    pub momentum_percent: f64,
    pub validation: Option<ValidationResult>,
}

impl EntryDecision {
    pub fn is_golden(&self) -> bool {
        self.signal.is_golden
    }
}

/// Why an entry cycle stopped short of a decision.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum EntryBlock {
    #[error("{ticker} already has an open position")]
    AlreadyOpen { ticker: String },

    #[error("admission filter: {0}")]
    Admission(AdmissionRejection),

    #[error("entry scoring: {0}")]
    Scoring(EntryRejection),

    #[error("daily trade limit of {limit} reached")]
    DailyLimit { limit: usize },

    #[error("enhanced validation: {0}")]
    Validation(ValidationRejection),
}

impl EntryBlock {
    /// Label used for rejection metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryBlock::AlreadyOpen { .. } => "already_open",
            EntryBlock::Admission(_) => "admission",
            EntryBlock::Scoring(rejection) => rejection.kind(),
            EntryBlock::DailyLimit { .. } => "daily_limit",
            EntryBlock::Validation(_) => "validation",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Enter(Box<EntryDecision>),
    Skip { ticker: String, block: EntryBlock },
}

impl EntryOutcome {
    pub fn decision(&self) -> Option<&EntryDecision> {
        match self {
            EntryOutcome::Enter(decision) => Some(decision),
            EntryOutcome::Skip { .. } => None,
        }
    }

    pub fn block(&self) -> Option<&EntryBlock> {
        match self {
            EntryOutcome::Enter(_) => None,
            EntryOutcome::Skip { block, .. } => Some(block),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitCycleOutcome {
    /// Nothing tracked or stored for the ticker
    NoPosition,
    Updated(PositionUpdate),
}

impl ExitCycleOutcome {
    pub fn is_exit(&self) -> bool {
        matches!(self, ExitCycleOutcome::Updated(update) if update.is_exit())
    }
}
