use std::env;
use std::fmt::Display;
use std::str::FromStr;

use analysis_core::ConfigError;
use risk_manager::RiskParameters;
use serde::{Deserialize, Serialize};
use signal_engine::{EntryScoringConfig, ExitConfig};
use validation::PeakDetectionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Admission limits
    pub max_daily_trades: usize,           // golden entries bypass this
    pub standard_position_size: f64,       // $ handed to the validation sizer
    pub enhanced_validation_max_price: f64, // run the 5-stage pipeline below this price
    pub validation_bar_lookback: usize,     // bars fetched per entry cycle

    // Telemetry
    pub metrics_log_interval: u64, // cycles between metric summaries, 0 = never

    // Decision thresholds
    pub risk: RiskParameters,
    pub entry: EntryScoringConfig,
    pub exit: ExitConfig,
    pub peak_detection: PeakDetectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_daily_trades: 10,
            standard_position_size: 1000.0,
            enhanced_validation_max_price: 20.0,
            validation_bar_lookback: 30,
            metrics_log_interval: 50,
            risk: RiskParameters::default(),
            entry: EntryScoringConfig::default(),
            exit: ExitConfig::default(),
            peak_detection: PeakDetectionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys take their defaults;
    /// present but unparsable keys are errors.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let peak_detection = match lookup("PEAK_DETECTION_CONFIG") {
            Some(path) if !path.trim().is_empty() => PeakDetectionConfig::from_file(path.trim())?,
            _ => PeakDetectionConfig::default(),
        };

        let config = Self {
            max_daily_trades: parse_or(&lookup, "MAX_DAILY_TRADES", "10")?,
            standard_position_size: parse_or(&lookup, "STANDARD_POSITION_SIZE", "1000.0")?,
            enhanced_validation_max_price: parse_or(
                &lookup,
                "ENHANCED_VALIDATION_MAX_PRICE",
                "20.0",
            )?,
            validation_bar_lookback: parse_or(&lookup, "VALIDATION_BAR_LOOKBACK", "30")?,
            metrics_log_interval: parse_or(&lookup, "METRICS_LOG_INTERVAL", "50")?,
            risk: RiskParameters::default(),
            entry: EntryScoringConfig::default(),
            exit: ExitConfig::default(),
            peak_detection,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.standard_position_size <= 0.0 || !self.standard_position_size.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "STANDARD_POSITION_SIZE".to_string(),
                reason: format!("{} must be a positive dollar amount", self.standard_position_size),
            });
        }
        if self.enhanced_validation_max_price < 0.0 || !self.enhanced_validation_max_price.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "ENHANCED_VALIDATION_MAX_PRICE".to_string(),
                reason: format!("{} must be >= 0", self.enhanced_validation_max_price),
            });
        }
        if self.validation_bar_lookback < self.peak_detection.volume_lookback_bars {
            return Err(ConfigError::InvalidValue {
                key: "VALIDATION_BAR_LOOKBACK".to_string(),
                reason: format!(
                    "{} is shorter than the volume window ({})",
                    self.validation_bar_lookback, self.peak_detection.volume_lookback_bars
                ),
            });
        }

        self.risk.validate()?;
        self.entry.validate()?;
        self.exit.validate()?;
        self.peak_detection.validate()?;
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
}
