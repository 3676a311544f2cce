use async_trait::async_trait;

use derma_domain::{AgentId, Fitzpatrick, StateDelta, StateKey, StateValue};

use crate::context::ExecutorContext;
use crate::contracts::VisionError;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

/// Estimates the Fitzpatrick phototype and flags low-confidence inputs
/// for the safety-calibration branch.
pub struct SkinToneExecutor;

fn parse_phototype(label: &str) -> Option<Fitzpatrick> {
    match label.strip_prefix("fitzpatrick:")? {
        "I" => Some(Fitzpatrick::I),
        "II" => Some(Fitzpatrick::II),
        "III" => Some(Fitzpatrick::III),
        "IV" => Some(Fitzpatrick::IV),
        "V" => Some(Fitzpatrick::V),
        "VI" => Some(Fitzpatrick::VI),
        _ => None,
    }
}

#[async_trait]
impl AgentExecutor for SkinToneExecutor {
    fn agent(&self) -> AgentId {
        AgentId::SkinToneDetector
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let classifications =
            ctx.services.vision.classify(&ctx.image).await.map_err(|err| match err {
                VisionError::Unavailable { reason } => ExecutorError::Unavailable { reason },
                VisionError::Rejected { reason } => ExecutorError::InputRejected { reason },
            })?;
        let (phototype, confidence) = classifications
            .iter()
            .find_map(|c| parse_phototype(&c.label).map(|p| (p, c.score)))
            .ok_or_else(|| ExecutorError::InternalFault {
                reason: "specialist returned no phototype estimate".into(),
            })?;

        let low_confidence = confidence < ctx.tuning.confidence_low_threshold;
        {
            let mut draft = ctx.draft.lock();
            draft.fitzpatrick = Some(phototype);
            draft.confidence = Some(confidence);
        }

        let mut updates = StateDelta::new();
        updates
            .set(
                StateKey::FitzpatrickType,
                StateValue::Fitzpatrick(Some(phototype)),
            )
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;
        updates
            .set(StateKey::ConfidenceScore, StateValue::score(confidence))
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;
        updates
            .set(StateKey::IsLowConfidence, StateValue::Flag(low_confidence))
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;

        let result = ExecutorResult::of(ExecutorMetadata::SkinTone {
            fitzpatrick: phototype.label().to_string(),
            confidence,
            low_confidence,
        })
        .with_updates(updates);
        // A low-confidence estimate invalidates the planned calibration
        // branch; the engine replans against the observed state.
        Ok(if low_confidence { result.replan() } else { result })
    }
}
