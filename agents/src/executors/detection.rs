use async_trait::async_trait;

use derma_domain::{AgentId, StateDelta, StateKey, StateValue};

use crate::context::ExecutorContext;
use crate::contracts::VisionError;
use crate::draft::LesionFinding;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

fn map_vision_error(err: VisionError) -> ExecutorError {
    match err {
        VisionError::Unavailable { reason } => ExecutorError::Unavailable { reason },
        VisionError::Rejected { reason } => ExecutorError::InputRejected { reason },
    }
}

/// Classifies candidate lesions and records the primary finding.
pub struct LesionDetectionExecutor;

#[async_trait]
impl AgentExecutor for LesionDetectionExecutor {
    fn agent(&self) -> AgentId {
        AgentId::LesionDetector
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let classifications = ctx
            .services
            .vision
            .classify(&ctx.image)
            .await
            .map_err(map_vision_error)?;
        let mut findings: Vec<LesionFinding> = classifications
            .iter()
            .filter_map(|c| {
                c.label.strip_prefix("lesion:").map(|label| LesionFinding {
                    label: label.to_string(),
                    score: c.score,
                })
            })
            .collect();
        findings.sort_by(|a, b| b.score.total_cmp(&a.score));
        let primary = findings
            .first()
            .cloned()
            .ok_or_else(|| ExecutorError::InternalFault {
                reason: "specialist returned no lesion candidates".into(),
            })?;

        {
            let mut draft = ctx.draft.lock();
            draft.findings = findings.clone();
            draft.primary_lesion = Some(primary.label.clone());
            draft.confidence = Some(primary.score);
        }

        let mut updates = StateDelta::new();
        updates
            .set(StateKey::ConfidenceScore, StateValue::score(primary.score))
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;

        Ok(ExecutorResult::of(ExecutorMetadata::Lesions {
            findings,
            primary: primary.label,
        })
        .with_updates(updates))
    }
}

/// Renders a saliency heatmap for the primary finding. Best-effort: the
/// catalogue marks this action skippable.
pub struct ExplainabilityExecutor;

#[async_trait]
impl AgentExecutor for ExplainabilityExecutor {
    fn agent(&self) -> AgentId {
        AgentId::ExplainabilityMapper
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let heatmap = ctx
            .services
            .vision
            .heatmap(&ctx.image)
            .await
            .map_err(map_vision_error)?;
        Ok(ExecutorResult::of(ExecutorMetadata::Explainability {
            heatmap_bytes: heatmap.len(),
        }))
    }
}
