use analysis_core::{Bar, ConfigError, InputAnomaly};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::confidence::{ConfidenceResult, EnhancedConfidenceCalculator};
use crate::config::PeakDetectionConfig;
use crate::momentum::{AccelerationResult, MomentumAccelerationAnalyzer};
use crate::peak::{PeakDetectionResult, PeakDetector};
use crate::position_sizer::{DynamicPositionSizer, PositionSizeResult};
use crate::volume::{VolumeAnalysis, VolumeAnalyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Input,
    Peak,
    Volume,
    Momentum,
    Confidence,
    PositionSize,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationRejection {
    #[error("invalid input: {anomaly}")]
    InvalidInput { anomaly: InputAnomaly },

    #[error("insufficient data: {anomaly}")]
    InsufficientData { anomaly: InputAnomaly },

    #[error("price too close to local peak (score {score:.3} > {threshold:.2})")]
    NearPeak { score: f64, threshold: f64 },

    #[error("momentum decelerating (acceleration {acceleration:.2} < {threshold:.2})")]
    MomentumDecelerating { acceleration: f64, threshold: f64 },

    #[error("confidence too low ({confidence:.3} < {threshold:.2})")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("position size is zero at confidence {confidence:.3}")]
    ZeroPositionSize { confidence: f64 },
}

impl ValidationRejection {
    pub fn stage(&self) -> ValidationStage {
        match self {
            ValidationRejection::InvalidInput { .. } => ValidationStage::Input,
            ValidationRejection::InsufficientData { .. }
            | ValidationRejection::NearPeak { .. } => ValidationStage::Peak,
            ValidationRejection::MomentumDecelerating { .. } => ValidationStage::Momentum,
            ValidationRejection::LowConfidence { .. } => ValidationStage::Confidence,
            ValidationRejection::ZeroPositionSize { .. } => ValidationStage::PositionSize,
        }
    }
}

/// Outcome of one pipeline run. Stages after the rejecting one stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ticker: String,
    pub passed: bool,
    pub rejection: Option<ValidationRejection>,
    pub peak: Option<PeakDetectionResult>,
    pub volume: Option<VolumeAnalysis>,
    pub acceleration: Option<AccelerationResult>,
    pub confidence: Option<ConfidenceResult>,
    pub position_size: Option<PositionSizeResult>,
}

impl ValidationResult {
    fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            passed: false,
            rejection: None,
            peak: None,
            volume: None,
            acceleration: None,
            confidence: None,
            position_size: None,
        }
    }

    fn reject(mut self, rejection: ValidationRejection) -> Self {
        debug!(
            "{} rejected at {:?} stage: {}",
            self.ticker,
            rejection.stage(),
            rejection
        );
        self.passed = false;
        self.rejection = Some(rejection);
        self
    }

    pub fn rejection_reason(&self) -> Option<String> {
        self.rejection.as_ref().map(|r| r.to_string())
    }

    /// Dollar size approved by the sizer, if the run got that far.
    pub fn approved_size(&self) -> Option<f64> {
        self.position_size
            .as_ref()
            .filter(|_| self.passed)
            .map(|p| p.position_size)
    }
}

/// Peak, volume, momentum, confidence and sizing checks run in that order;
/// the first failure ends the run.
#[derive(Debug, Clone)]
pub struct EnhancedValidationPipeline {
    config: PeakDetectionConfig,
    peak_detector: PeakDetector,
    volume_analyzer: VolumeAnalyzer,
    momentum_analyzer: MomentumAccelerationAnalyzer,
    confidence_calculator: EnhancedConfidenceCalculator,
    position_sizer: DynamicPositionSizer,
}

impl EnhancedValidationPipeline {
    pub fn new(config: PeakDetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            peak_detector: PeakDetector::from_validated(&config),
            // Volume feeds confidence only; it never rejects on its own here
            volume_analyzer: VolumeAnalyzer::from_validated(&config).with_min_score(0.0),
            momentum_analyzer: MomentumAccelerationAnalyzer::from_validated(&config),
            confidence_calculator: EnhancedConfidenceCalculator::from_config(&config),
            position_sizer: DynamicPositionSizer::from_validated(&config),
            config,
        })
    }

    /// Swap in a different confidence calculator. Config weights stay the
    /// reference, so a mismatch is logged.
    pub fn with_confidence_calculator(mut self, calculator: EnhancedConfidenceCalculator) -> Self {
        if calculator.weights_diverge_from_config(&self.config) {
            warn!(
                "Confidence calculator weights {:?} differ from configured weights (momentum {}, peak {}, volume {}, acceleration {})",
                calculator.weights(),
                self.config.momentum_weight,
                self.config.peak_weight,
                self.config.volume_weight,
                self.config.acceleration_weight
            );
        }
        self.confidence_calculator = calculator;
        self
    }

    pub fn config(&self) -> &PeakDetectionConfig {
        &self.config
    }

    pub fn validate(
        &self,
        ticker: &str,
        bars: &[Bar],
        current_price: f64,
        momentum_score: f64,
        standard_size: f64,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(ticker);

        if !self.config.enabled {
            debug!("{}: enhanced validation disabled, admitting", ticker);
            result.passed = true;
            return result;
        }

        if !current_price.is_finite() || current_price <= 0.0 {
            return result.reject(ValidationRejection::InvalidInput {
                anomaly: InputAnomaly::NonPositiveEntryPrice {
                    value: current_price,
                },
            });
        }
        if !momentum_score.is_finite() {
            return result.reject(ValidationRejection::InvalidInput {
                anomaly: InputAnomaly::NonFinite {
                    field: "momentum_score".to_string(),
                },
            });
        }

        // 1. Peak proximity
        let peak = match self.peak_detector.detect(bars, current_price) {
            Ok(peak) => &*result.peak.insert(peak),
            Err(anomaly) => {
                return result.reject(ValidationRejection::InsufficientData { anomaly });
            }
        };
        debug!(
            "{}: peak {:.4} distance {:.4} score {:.3}",
            ticker, peak.peak_price, peak.distance_from_peak, peak.proximity_score
        );
        if peak.is_near_peak {
            let rejection = ValidationRejection::NearPeak {
                score: peak.proximity_score,
                threshold: self.peak_detector.threshold(),
            };
            return result.reject(rejection);
        }

        // 2. Volume confirmation
        let volume = &*result.volume.insert(self.volume_analyzer.analyze(bars));
        if let Some(anomaly) = &volume.anomaly {
            warn!("{}: volume analysis degraded: {}", ticker, anomaly);
        }
        debug!(
            "{}: volume ratio {:.2} score {:.3}",
            ticker, volume.volume_ratio, volume.confirmation_score
        );

        // 3. Momentum acceleration
        let acceleration = &*result
            .acceleration
            .insert(self.momentum_analyzer.analyze(bars));
        debug!(
            "{}: acceleration {:.3} (normalized {:.3})",
            ticker, acceleration.acceleration, acceleration.normalized_acceleration
        );
        if acceleration.is_decelerating {
            let rejection = ValidationRejection::MomentumDecelerating {
                acceleration: acceleration.acceleration,
                threshold: self.momentum_analyzer.threshold(),
            };
            return result.reject(rejection);
        }

        // 4. Confidence
        let confidence = &*result.confidence.insert(self.confidence_calculator.calculate(
            momentum_score,
            peak,
            volume,
            acceleration,
        ));
        let score = confidence.confidence;
        if !confidence.meets_threshold {
            let rejection = ValidationRejection::LowConfidence {
                confidence: score,
                threshold: self.confidence_calculator.min_confidence(),
            };
            return result.reject(rejection);
        }

        // 5. Position sizing
        let size = result
            .position_size
            .insert(self.position_sizer.size(score, standard_size))
            .position_size;
        if size <= 0.0 {
            return result.reject(ValidationRejection::ZeroPositionSize { confidence: score });
        }

        info!(
            "{} passed enhanced validation: confidence {:.3}, size ${:.2}",
            ticker, score, size
        );
        result.passed = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_bars::bar;
    use approx::assert_relative_eq;

    fn pipeline() -> EnhancedValidationPipeline {
        EnhancedValidationPipeline::new(PeakDetectionConfig::default()).unwrap()
    }

    /// 20 bars drifting up to a 10.60 high, then pulling back.
    fn pullback_bars(last_close: f64, last_volume: f64) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..16)
            .map(|i| {
                let close = 9.80 + i as f64 * 0.05;
                bar(i, close + 0.02, close, 1_000.0)
            })
            .collect();
        bars.push(bar(16, 10.60, 10.50, 1_000.0));
        bars.push(bar(17, 10.55, 10.40, 1_000.0));
        bars.push(bar(18, 10.45, 10.30, 1_000.0));
        bars.push(bar(19, 10.35, last_close, last_volume));
        bars
    }

    #[test]
    fn test_passes_on_pullback_with_volume() {
        let bars = pullback_bars(10.25, 2_000.0);
        let result = pipeline().validate("SOFI", &bars, 10.25, 12.0, 1000.0);

        assert!(result.passed, "{:?}", result.rejection);
        assert!(result.rejection.is_none());
        let peak = result.peak.as_ref().unwrap();
        assert_relative_eq!(peak.peak_price, 10.60);
        assert!(peak.proximity_score < 0.80);
        assert_relative_eq!(result.volume.as_ref().unwrap().confirmation_score, 1.0);
        assert!(result.confidence.as_ref().unwrap().confidence >= 0.5);
        assert!(result.approved_size().unwrap() >= 500.0);
    }

    #[test]
    fn test_near_peak_short_circuits() {
        let highs = [10.20, 10.30, 10.40, 10.45, 10.50, 10.55, 10.58, 10.60, 10.59, 10.60];
        let bars: Vec<Bar> = highs
            .iter()
            .enumerate()
            .map(|(i, &h)| bar(i as i64, h, h - 0.01, 1_000.0))
            .collect();

        let result = pipeline().validate("SOFI", &bars, 10.59, 12.0, 1000.0);

        assert!(!result.passed);
        assert_eq!(result.rejection.as_ref().unwrap().stage(), ValidationStage::Peak);
        assert!(result
            .rejection_reason()
            .unwrap()
            .starts_with("price too close to local peak"));
        assert_relative_eq!(result.peak.as_ref().unwrap().proximity_score, 0.9686, epsilon = 1e-4);
        assert!(result.volume.is_none());
        assert!(result.acceleration.is_none());
        assert!(result.confidence.is_none());
        assert!(result.position_size.is_none());
        assert!(result.approved_size().is_none());
    }

    #[test]
    fn test_deceleration_rejects_after_volume() {
        let mut bars: Vec<Bar> = (0..6).map(|i| bar(i, 10.60, 10.0, 1_000.0)).collect();
        bars.push(bar(6, 10.60, 10.0, 1_000.0));
        bars.push(bar(7, 10.15, 10.1, 1_000.0));
        bars.push(bar(8, 10.35, 10.3, 1_000.0));
        bars.push(bar(9, 10.25, 10.2, 1_000.0));

        let result = pipeline().validate("RIOT", &bars, 10.2, 12.0, 1000.0);

        assert!(!result.passed);
        assert!(matches!(
            result.rejection,
            Some(ValidationRejection::MomentumDecelerating { .. })
        ));
        assert!(result.rejection_reason().unwrap().starts_with("momentum decelerating"));
        assert!(result.peak.is_some());
        assert!(result.volume.is_some());
        assert_relative_eq!(
            result.acceleration.as_ref().unwrap().acceleration,
            -2.951072,
            epsilon = 1e-6
        );
        assert!(result.confidence.is_none());
        assert!(result.position_size.is_none());
    }

    #[test]
    fn test_low_confidence_rejects() {
        // weak momentum and thin volume
        let bars = pullback_bars(10.25, 200.0);
        let result = pipeline().validate("SOFI", &bars, 10.25, 1.0, 1000.0);

        assert!(!result.passed);
        assert!(matches!(
            result.rejection,
            Some(ValidationRejection::LowConfidence { .. })
        ));
        assert!(result.confidence.is_some());
        assert!(result.position_size.is_none());
    }

    #[test]
    fn test_missing_bars_and_bad_price() {
        let result = pipeline().validate("SOFI", &[], 10.0, 12.0, 1000.0);
        assert!(matches!(
            result.rejection,
            Some(ValidationRejection::InsufficientData { .. })
        ));
        assert!(result.peak.is_none());

        let bars = pullback_bars(10.25, 2_000.0);
        let result = pipeline().validate("SOFI", &bars, 0.0, 12.0, 1000.0);
        assert_eq!(result.rejection.as_ref().unwrap().stage(), ValidationStage::Input);
    }

    #[test]
    fn test_disabled_admits() {
        let config = PeakDetectionConfig {
            enabled: false,
            ..Default::default()
        };
        let result = EnhancedValidationPipeline::new(config)
            .unwrap()
            .validate("SOFI", &[], 10.0, 0.0, 1000.0);
        assert!(result.passed);
        assert!(result.peak.is_none());
    }

    #[test]
    fn test_invalid_config_refused() {
        let config = PeakDetectionConfig {
            acceleration_weight: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            EnhancedValidationPipeline::new(config),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn test_custom_calculator_changes_scoring() {
        let bars = pullback_bars(10.25, 2_000.0);
        let configured = pipeline().validate("SOFI", &bars, 10.25, 12.0, 1000.0);
        let equal = pipeline()
            .with_confidence_calculator(EnhancedConfidenceCalculator::default())
            .validate("SOFI", &bars, 10.25, 12.0, 1000.0);

        let a = configured.confidence.unwrap().confidence;
        let b = equal.confidence.unwrap().confidence;
        assert!((a - b).abs() > 1e-6);
    }
}
