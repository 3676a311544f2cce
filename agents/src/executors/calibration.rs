use async_trait::async_trait;

use derma_domain::{AgentId, StateKey};

use crate::context::ExecutorContext;
use crate::registry::AgentExecutor;
use crate::result::{CalibrationMode, ExecutorError, ExecutorMetadata, ExecutorResult};

/// Calibration for confident skin-tone estimates.
pub struct StandardCalibrationExecutor;

#[async_trait]
impl AgentExecutor for StandardCalibrationExecutor {
    fn agent(&self) -> AgentId {
        AgentId::StandardCalibrator
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        Ok(ExecutorResult::of(ExecutorMetadata::Calibration {
            mode: CalibrationMode::Standard,
            decision_threshold: ctx.tuning.confidence_low_threshold,
        }))
    }
}

/// Conservative calibration taken when the skin-tone estimate was
/// low-confidence. Lowers the effective decision threshold so borderline
/// findings are escalated rather than dismissed.
pub struct SafetyCalibrationExecutor;

#[async_trait]
impl AgentExecutor for SafetyCalibrationExecutor {
    fn agent(&self) -> AgentId {
        AgentId::SafetyCalibrator
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        if !ctx.world.flag(StateKey::IsLowConfidence) {
            return Err(ExecutorError::InternalFault {
                reason: "safety calibration dispatched without a low-confidence observation"
                    .into(),
            });
        }
        Ok(ExecutorResult::of(ExecutorMetadata::Calibration {
            mode: CalibrationMode::Safety,
            decision_threshold: ctx.tuning.safety_calibration_threshold,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, test_context_with};
    use derma_domain::{StateValue, WorldState};

    #[tokio::test]
    async fn standard_uses_the_low_confidence_threshold() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        let result = StandardCalibrationExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Calibration {
                mode: CalibrationMode::Standard,
                decision_threshold,
            } if (decision_threshold - 0.65).abs() < f32::EPSILON
        ));
    }

    #[tokio::test]
    async fn safety_requires_the_low_confidence_observation() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        let err = SafetyCalibrationExecutor.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InternalFault { .. }));
    }

    #[tokio::test]
    async fn safety_lowers_the_decision_threshold() {
        let mut world = WorldState::initial();
        world
            .set(StateKey::IsLowConfidence, StateValue::Flag(true))
            .unwrap();
        let ctx = test_context_with(b"\xff\xd8\xff sample".to_vec(), world).await;
        let result = SafetyCalibrationExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Calibration {
                mode: CalibrationMode::Safety,
                decision_threshold,
            } if (decision_threshold - 0.5).abs() < f32::EPSILON
        ));
    }
}
