use async_trait::async_trait;

use derma_domain::{AgentId, Fitzpatrick, StateDelta, StateKey, StateValue};

use crate::context::ExecutorContext;
use crate::contracts::GeneratorError;
use crate::draft::RiskLabel;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

fn base_risk(primary: &str) -> f32 {
    if primary.eq_ignore_ascii_case("melanoma") {
        0.9
    } else if primary.eq_ignore_ascii_case("basal cell carcinoma") {
        0.55
    } else {
        0.2
    }
}

fn label_for(score: f32) -> RiskLabel {
    if score >= 0.7 {
        RiskLabel::High
    } else if score >= 0.4 {
        RiskLabel::Medium
    } else {
        RiskLabel::Low
    }
}

/// Blends the classifier output and precedent into a risk label.
pub struct RiskAssessmentExecutor;

#[async_trait]
impl AgentExecutor for RiskAssessmentExecutor {
    fn agent(&self) -> AgentId {
        AgentId::RiskAssessor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let (primary, confidence, precedent_top) = {
            let draft = ctx.draft.lock();
            (
                draft.primary_lesion.clone(),
                draft.confidence.unwrap_or(0.0),
                draft.precedent_top_score,
            )
        };
        let primary = primary.ok_or_else(|| ExecutorError::InternalFault {
            reason: "no primary finding to assess".into(),
        })?;

        let mut score = base_risk(&primary);
        if confidence < ctx.tuning.confidence_low_threshold {
            // Uncertainty escalates rather than reassures.
            score += 0.1;
        }
        if precedent_top.is_some_and(|top| top > 0.95) {
            score -= 0.05;
        }
        let score = score.clamp(0.0, 1.0);
        let label = label_for(score);
        ctx.draft.lock().risk_label = Some(label);

        Ok(ExecutorResult::of(ExecutorMetadata::Risk { label, score }))
    }
}

/// Scores demographic fairness of the assessment across phototypes.
pub struct FairnessAuditExecutor;

#[async_trait]
impl AgentExecutor for FairnessAuditExecutor {
    fn agent(&self) -> AgentId {
        AgentId::FairnessAuditor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let (phototype, confidence, precedent_hits) = {
            let draft = ctx.draft.lock();
            (
                draft.fitzpatrick,
                draft.confidence.unwrap_or(0.0),
                draft.precedent_hits,
            )
        };
        let mut score = 0.92f32;
        let darker_phototype =
            matches!(phototype, Some(Fitzpatrick::V | Fitzpatrick::VI));
        if darker_phototype && confidence < ctx.tuning.confidence_low_threshold {
            score -= 0.12;
        }
        if precedent_hits == 0 {
            score -= 0.03;
        }
        let score = score.clamp(0.0, 1.0);
        ctx.draft.lock().fairness_score = Some(score);

        let mut updates = StateDelta::new();
        updates
            .set(StateKey::FairnessScore, StateValue::score(score))
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;

        Ok(ExecutorResult::of(ExecutorMetadata::Fairness { score }).with_updates(updates))
    }
}

/// Drafts patient-facing next steps through the generator, falling back
/// to the local engine when the primary is unreachable.
pub struct RecommendationExecutor;

#[async_trait]
impl AgentExecutor for RecommendationExecutor {
    fn agent(&self) -> AgentId {
        AgentId::RecommendationWriter
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        if ctx.cancel.is_cancelled() {
            return Err(ExecutorError::InternalFault {
                reason: "cancelled before dispatch".into(),
            });
        }
        let (primary, risk) = {
            let draft = ctx.draft.lock();
            (
                draft.primary_lesion.clone().unwrap_or_default(),
                draft.risk_label,
            )
        };
        let risk_label = risk.map_or("Unassessed", RiskLabel::label);
        let prompt = format!(
            "Draft next-step guidance for a {primary} finding with {risk_label} risk."
        );
        let system = "Respond with JSON: recommendation, self_care, disclaimer.";

        let primary_generator = &ctx.services.generator;
        let (engine, text) = match primary_generator.generate(&prompt, Some(system)).await {
            Ok(text) => (primary_generator.engine(), text),
            Err(GeneratorError::Unavailable { .. }) => {
                let fallback = &ctx.services.fallback_generator;
                let text = fallback
                    .generate(&prompt, Some(system))
                    .await
                    .map_err(|err| ExecutorError::Unavailable {
                        reason: err.to_string(),
                    })?;
                (fallback.engine(), text)
            }
            Err(GeneratorError::Malformed { reason }) => {
                return Err(ExecutorError::InternalFault { reason });
            }
        };

        {
            let mut draft = ctx.draft.lock();
            draft.recommendation = Some(text);
            draft.recommendation_engine = Some(engine.to_string());
        }
        Ok(ExecutorResult::of(ExecutorMetadata::Recommendation {
            engine: engine.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::LesionFinding;
    use crate::testing::test_context;

    fn seed_finding(ctx: &ExecutorContext, label: &str, score: f32) {
        let mut draft = ctx.draft.lock();
        draft.findings = vec![LesionFinding {
            label: label.into(),
            score,
        }];
        draft.primary_lesion = Some(label.into());
        draft.confidence = Some(score);
    }

    #[tokio::test]
    async fn melanoma_assesses_high() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        seed_finding(&ctx, "Melanoma", 0.9);
        let result = RiskAssessmentExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Risk {
                label: RiskLabel::High,
                ..
            }
        ));
        assert_eq!(ctx.draft.lock().risk_label, Some(RiskLabel::High));
    }

    #[tokio::test]
    async fn benign_assesses_low_but_uncertainty_escalates() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        seed_finding(&ctx, "Benign Nevus", 0.95);
        let confident = RiskAssessmentExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Risk { score: low, .. } = confident.metadata else {
            panic!("wrong metadata variant");
        };
        seed_finding(&ctx, "Benign Nevus", 0.4);
        let uncertain = RiskAssessmentExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Risk { score: bumped, .. } = uncertain.metadata else {
            panic!("wrong metadata variant");
        };
        assert!(bumped > low);
    }

    #[tokio::test]
    async fn fairness_penalises_uncertain_darker_phototypes() {
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        {
            let mut draft = ctx.draft.lock();
            draft.fitzpatrick = Some(Fitzpatrick::VI);
            draft.confidence = Some(0.4);
        }
        let result = FairnessAuditExecutor.execute(&ctx).await.unwrap();
        let ExecutorMetadata::Fairness { score } = result.metadata else {
            panic!("wrong metadata variant");
        };
        assert!(score < 0.85);
    }

    #[tokio::test]
    async fn recommendation_falls_back_to_local_engine() {
        // The test context wires an unavailable primary generator.
        let ctx = test_context(b"\xff\xd8\xff sample".to_vec()).await;
        seed_finding(&ctx, "Melanoma", 0.9);
        ctx.draft.lock().risk_label = Some(RiskLabel::High);
        let result = RecommendationExecutor.execute(&ctx).await.unwrap();
        assert!(matches!(
            result.metadata,
            ExecutorMetadata::Recommendation { ref engine } if engine == "local-fallback"
        ));
        let draft = ctx.draft.lock();
        assert_eq!(draft.recommendation_engine.as_deref(), Some("local-fallback"));
        assert!(draft.recommendation.as_deref().unwrap().contains("two weeks"));
    }
}
