//! Agent executors, one per catalogue agent, grouped by pipeline stage.

mod assessment;
mod calibration;
mod commit;
mod detection;
mod imaging;
mod precedent;
mod quality;
mod skin_tone;

pub use assessment::{FairnessAuditExecutor, RecommendationExecutor, RiskAssessmentExecutor};
pub use calibration::{SafetyCalibrationExecutor, StandardCalibrationExecutor};
pub use commit::{AuditCommitExecutor, EncryptionExecutor};
pub use detection::{ExplainabilityExecutor, LesionDetectionExecutor};
pub use imaging::{FeatureExtractionExecutor, PreprocessingExecutor, SegmentationExecutor};
pub use precedent::{LearningExecutor, SimilaritySearchExecutor};
pub use quality::QualityGateExecutor;
pub use skin_tone::SkinToneExecutor;

/// Maps one digest byte onto `[0, 1]`.
pub(crate) fn digest_fraction(digest: &[u8; 32], index: usize) -> f32 {
    f32::from(digest[index % 32]) / 255.0
}
