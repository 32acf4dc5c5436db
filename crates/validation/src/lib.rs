pub mod confidence;
pub mod config;
pub mod momentum;
pub mod peak;
pub mod pipeline;
pub mod position_sizer;
pub mod volume;

#[cfg(test)]
mod test_bars;

pub use confidence::{
    ConfidenceComponents, ConfidenceResult, ConfidenceWeights, EnhancedConfidenceCalculator,
};
pub use config::{PeakDetectionConfig, WEIGHT_SUM_TOLERANCE};
pub use momentum::{AccelerationResult, MomentumAccelerationAnalyzer};
pub use peak::{PeakDetectionResult, PeakDetector};
pub use pipeline::{EnhancedValidationPipeline, ValidationRejection, ValidationResult, ValidationStage};
pub use position_sizer::{ConfidenceTier, DynamicPositionSizer, PositionSizeResult};
pub use volume::{VolumeAnalysis, VolumeAnalyzer};
