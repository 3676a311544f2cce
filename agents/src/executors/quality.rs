use async_trait::async_trait;

use derma_domain::AgentId;

use crate::context::ExecutorContext;
use crate::executors::digest_fraction;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

/// Gate rejecting captures too degraded to analyse.
pub struct QualityGateExecutor;

#[async_trait]
impl AgentExecutor for QualityGateExecutor {
    fn agent(&self) -> AgentId {
        AgentId::QualityAssessor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        if ctx.image.is_empty() {
            return Err(ExecutorError::InputRejected {
                reason: "empty capture".into(),
            });
        }
        let digest = ctx.image_digest();
        let sharpness = 0.55 + digest_fraction(&digest, 5) * 0.45;
        let exposure = 0.5 + digest_fraction(&digest, 6) * 0.5;
        if sharpness < 0.2 || exposure < 0.2 {
            return Err(ExecutorError::InputRejected {
                reason: "capture below quality floor".into(),
            });
        }
        Ok(ExecutorResult::of(ExecutorMetadata::Quality {
            sharpness,
            exposure,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::test_context;

    use super::*;

    #[tokio::test]
    async fn accepts_reasonable_captures() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        let result = QualityGateExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Quality { sharpness, .. } if sharpness > 0.0
        ));
        assert!(!result.should_replan);
    }

    #[tokio::test]
    async fn rejects_empty_captures() {
        let ctx = test_context(Vec::new()).await;
        let err = QualityGateExecutor.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InputRejected { .. }));
    }
}
