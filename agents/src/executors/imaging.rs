use async_trait::async_trait;

use derma_domain::{AgentId, StateKey};

use crate::context::ExecutorContext;
use crate::executors::digest_fraction;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

/// Segmentation inclusion threshold under standard calibration.
const SEGMENTATION_THRESHOLD: f32 = 0.55;
/// Tightened threshold applied after safety calibration.
const SEGMENTATION_THRESHOLD_SAFETY: f32 = 0.65;

/// Colour and geometry normalisation ahead of segmentation.
pub struct PreprocessingExecutor;

#[async_trait]
impl AgentExecutor for PreprocessingExecutor {
    fn agent(&self) -> AgentId {
        AgentId::Preprocessor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let digest = ctx.image_digest();
        // Normalised dimensions are derived from the capture identity
        // until a real decoder is bound.
        let width = 448 + u32::from(digest[8]) % 128;
        let height = 448 + u32::from(digest[9]) % 128;
        Ok(ExecutorResult::of(ExecutorMetadata::Preprocessing {
            width,
            height,
        }))
    }
}

/// Candidate lesion-region segmentation. The inclusion threshold
/// tightens when the run went through safety calibration.
pub struct SegmentationExecutor;

#[async_trait]
impl AgentExecutor for SegmentationExecutor {
    fn agent(&self) -> AgentId {
        AgentId::Segmenter
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let threshold = if ctx.world.flag(StateKey::SafetyCalibrated) {
            SEGMENTATION_THRESHOLD_SAFETY
        } else {
            SEGMENTATION_THRESHOLD
        };
        let digest = ctx.image_digest();
        let regions = 1 + usize::from(digest[10]) % 3;
        ctx.draft.lock().segmentation_regions = Some(regions);
        Ok(ExecutorResult::of(ExecutorMetadata::Segmentation {
            regions,
            threshold,
        }))
    }
}

/// Morphology and texture feature extraction per segmented region.
pub struct FeatureExtractionExecutor;

#[async_trait]
impl AgentExecutor for FeatureExtractionExecutor {
    fn agent(&self) -> AgentId {
        AgentId::FeatureExtractor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let regions = ctx.draft.lock().segmentation_regions.unwrap_or(1);
        let digest = ctx.image_digest();
        let per_region = 96 + (f32::from(digest[11]) * digest_fraction(&digest, 12)) as usize;
        Ok(ExecutorResult::of(ExecutorMetadata::Features {
            vector_len: regions * per_region,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, test_context_with};
    use derma_domain::{StateValue, WorldState};

    #[tokio::test]
    async fn segmentation_uses_standard_threshold_by_default() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        let result = SegmentationExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Segmentation { threshold, .. }
                if (threshold - SEGMENTATION_THRESHOLD).abs() < f32::EPSILON
        ));
    }

    #[tokio::test]
    async fn segmentation_tightens_after_safety_calibration() {
        let mut world = WorldState::initial();
        world
            .set(StateKey::SafetyCalibrated, StateValue::Flag(true))
            .unwrap();
        let ctx = test_context_with(b"\xff\xd8\xff sample".to_vec(), world).await;
        let result = SegmentationExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Segmentation { threshold, .. }
                if (threshold - SEGMENTATION_THRESHOLD_SAFETY).abs() < f32::EPSILON
        ));
    }

    #[tokio::test]
    async fn features_scale_with_segmented_regions() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        SegmentationExecutor.execute(&ctx).await.unwrap();
        let regions = ctx.draft.lock().segmentation_regions.unwrap();
        let result = FeatureExtractionExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Features { vector_len } = result.metadata else {
            panic!("wrong metadata variant");
        };
        assert!(vector_len >= regions * 96);
    }
}
