use async_trait::async_trait;
use serde_json::json;

use derma_domain::{AgentId, Fitzpatrick};
use derma_reasoning::{PatternDraft, PatternMetadata, SearchFilter, SearchQuery};

use crate::context::ExecutorContext;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

/// Task family under which analysis patterns are stored and retrieved.
const TASK_TYPE: &str = "lesion-analysis";

fn query_text(primary: &str, phototype: Option<Fitzpatrick>) -> String {
    match phototype {
        Some(phototype) => format!("{primary} fitzpatrick {}", phototype.label()),
        None => primary.to_string(),
    }
}

/// Consults the reasoning bank for precedent patterns similar to the
/// current finding.
pub struct SimilaritySearchExecutor;

#[async_trait]
impl AgentExecutor for SimilaritySearchExecutor {
    fn agent(&self) -> AgentId {
        AgentId::SimilaritySearcher
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        if ctx.cancel.is_cancelled() {
            return Err(ExecutorError::InternalFault {
                reason: "cancelled before dispatch".into(),
            });
        }
        let (primary, phototype) = {
            let draft = ctx.draft.lock();
            (draft.primary_lesion.clone(), draft.fitzpatrick)
        };
        let primary = primary.ok_or_else(|| ExecutorError::InternalFault {
            reason: "no primary finding to search on".into(),
        })?;
        let hits = ctx
            .services
            .bank
            .search(SearchQuery {
                embedding: None,
                text: Some(query_text(&primary, phototype)),
                k: 5,
                filter: Some(SearchFilter {
                    task_type: Some(TASK_TYPE.into()),
                    fitzpatrick: None,
                }),
            })
            .await
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;

        let top_score = hits.first().map(|hit| hit.score);
        {
            let mut draft = ctx.draft.lock();
            draft.precedent_hits = hits.len();
            draft.precedent_top_score = top_score;
        }
        Ok(ExecutorResult::of(ExecutorMetadata::Similarity {
            hits: hits.len(),
            top_score,
        }))
    }
}

/// Commits the finished analysis to the reasoning bank as an immutable
/// pattern. Clinician corrections arrive later as separate patterns
/// with `is_correction` set and a higher learning weight.
pub struct LearningExecutor;

#[async_trait]
impl AgentExecutor for LearningExecutor {
    fn agent(&self) -> AgentId {
        AgentId::LearningRecorder
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let (primary, phototype, confidence, risk) = {
            let draft = ctx.draft.lock();
            (
                draft.primary_lesion.clone().unwrap_or_default(),
                draft.fitzpatrick,
                draft.confidence.unwrap_or(0.0),
                draft.risk_label,
            )
        };
        let outcome = match risk {
            Some(risk) => format!("{primary} assessed {}", risk.label()),
            None => primary.clone(),
        };
        let embedding = ctx
            .services
            .embedder
            .encode(&query_text(&primary, phototype))
            .await
            .map_err(|err| ExecutorError::Unavailable {
                reason: err.to_string(),
            })?;

        let mut metadata = PatternMetadata {
            is_correction: false,
            learning_weight: 1.0,
            fitzpatrick: phototype,
            extra: serde_json::Map::new(),
        };
        if !ctx.privacy_mode {
            metadata
                .extra
                .insert("run_id".into(), json!(ctx.run_id.clone()));
        }

        let id = ctx
            .services
            .bank
            .store(
                PatternDraft {
                    task_type: TASK_TYPE.into(),
                    approach: format!(
                        "goap-pipeline/{}",
                        ctx.services.vision.kind().label()
                    ),
                    outcome,
                    success_rate: confidence,
                    timestamp: ctx.services.clock.now(),
                    metadata,
                    embedding,
                },
                true,
            )
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;
        ctx.draft.lock().pattern_id = Some(id.to_string());

        Ok(ExecutorResult::of(ExecutorMetadata::Learning {
            pattern_id: id.to_string(),
            correction: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::LesionDetectionExecutor;
    use crate::testing::test_context;

    #[tokio::test]
    async fn similarity_requires_a_primary_finding() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        let err = SimilaritySearchExecutor.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InternalFault { .. }));
    }

    #[tokio::test]
    async fn learning_then_search_round_trips() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        LesionDetectionExecutor.execute(&ctx).await.unwrap();
        let learned = LearningExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Learning { pattern_id, .. } = learned.metadata else {
            panic!("wrong metadata variant");
        };
        assert_eq!(ctx.services.bank.len(), 1);
        assert_eq!(ctx.draft.lock().pattern_id.as_deref(), Some(pattern_id.as_str()));

        let searched = SimilaritySearchExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Similarity { hits, top_score } = searched.metadata else {
            panic!("wrong metadata variant");
        };
        assert_eq!(hits, 1);
        assert!((top_score.unwrap() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn privacy_mode_drops_run_linkage() {
        let mut ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        ctx.privacy_mode = true;
        LesionDetectionExecutor.execute(&ctx).await.unwrap();
        LearningExecutor.execute(&ctx).await.unwrap();
        let pattern = ctx.services.bank.patterns().pop().unwrap();
        assert!(pattern.metadata.extra.get("run_id").is_none());
    }
}
