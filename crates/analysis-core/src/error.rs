use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raised while loading or validating tunable thresholds. Always fatal:
/// evaluation never starts with a configuration that failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range ({expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{field} = {value} must be <= 0 (stop losses are negative percentages)")]
    PositiveStopLoss { field: &'static str, value: f64 },

    #[error("confidence weights sum to {sum:.4}, expected 1.0 ± 0.001")]
    WeightSum { sum: f64 },

    #[error("threshold ordering violated: {0}")]
    Ordering(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid input that a formula absorbed by falling back to a safe default.
/// Carried inside results so callers can see it; never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputAnomaly {
    NonPositiveEntryPrice { value: f64 },
    NonPositiveAtr { value: f64 },
    NonFinite { field: String },
    MalformedBar { index: usize },
    InsufficientBars { needed: usize, got: usize },
    ZeroAverageVolume,
}

impl fmt::Display for InputAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputAnomaly::NonPositiveEntryPrice { value } => {
                write!(f, "non-positive entry price {value}")
            }
            InputAnomaly::NonPositiveAtr { value } => write!(f, "non-positive ATR {value}"),
            InputAnomaly::NonFinite { field } => write!(f, "{field} is not finite"),
            InputAnomaly::MalformedBar { index } => write!(f, "malformed bar at index {index}"),
            InputAnomaly::InsufficientBars { needed, got } => {
                write!(f, "insufficient bars: need {needed}, got {got}")
            }
            InputAnomaly::ZeroAverageVolume => f.write_str("average volume is zero"),
        }
    }
}

/// Helper for range checks during config validation.
pub fn ensure_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}

/// Helper for the "stop-loss fields must be <= 0" rule.
pub fn ensure_non_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value <= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::PositiveStopLoss { field, value })
    }
}
