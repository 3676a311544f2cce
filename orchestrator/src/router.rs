use serde::{Deserialize, Serialize};

use derma_agents::SpecialistKind;
use derma_domain::{full_analysis_goal, screening_goal, Predicate};

/// Kind of artifact submitted for analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Dermoscope capture.
    DermoscopyImage,
    /// Ordinary clinical photograph.
    ClinicalPhoto,
}

/// What the caller asked the pipeline to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestedAction {
    /// Full analysis with fairness audit and saliency mapping.
    FullAnalysis,
    /// Quick screening pass.
    QuickScreening,
}

/// Goal-state variant an intent binds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalVariant {
    /// Full pipeline.
    FullAnalysis,
    /// Screening pipeline.
    Screening,
}

impl GoalVariant {
    /// The goal predicate for this variant.
    #[must_use]
    pub fn predicate(self) -> Predicate {
        match self {
            Self::FullAnalysis => full_analysis_goal(),
            Self::Screening => screening_goal(),
        }
    }
}

/// Routing input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRequest {
    /// Submitted artifact kind.
    pub artifact_kind: ArtifactKind,
    /// Requested pipeline action.
    pub action: RequestedAction,
}

/// Routing output: which goal variant to plan for and which specialist
/// to bind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intent {
    /// Goal variant.
    pub goal: GoalVariant,
    /// Specialist binding.
    pub specialist: SpecialistKind,
}

/// Pure intent selection. No side effects; identical inputs always map
/// to identical intents.
#[must_use]
pub fn route(request: RouteRequest) -> Intent {
    let specialist = match request.artifact_kind {
        ArtifactKind::DermoscopyImage => SpecialistKind::Dermoscopy,
        ArtifactKind::ClinicalPhoto => SpecialistKind::ClinicalPhoto,
    };
    let goal = match request.action {
        RequestedAction::FullAnalysis => GoalVariant::FullAnalysis,
        RequestedAction::QuickScreening => GoalVariant::Screening,
    };
    Intent { goal, specialist }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derma_domain::{StateKey, StateValue, WorldState};

    #[test]
    fn routing_is_deterministic() {
        let request = RouteRequest {
            artifact_kind: ArtifactKind::DermoscopyImage,
            action: RequestedAction::FullAnalysis,
        };
        assert_eq!(route(request), route(request));
        assert_eq!(
            route(request),
            Intent {
                goal: GoalVariant::FullAnalysis,
                specialist: SpecialistKind::Dermoscopy,
            }
        );
    }

    #[test]
    fn screening_request_binds_the_screening_goal() {
        let intent = route(RouteRequest {
            artifact_kind: ArtifactKind::ClinicalPhoto,
            action: RequestedAction::QuickScreening,
        });
        assert_eq!(intent.goal, GoalVariant::Screening);
        assert_eq!(intent.specialist, SpecialistKind::ClinicalPhoto);

        let mut state = WorldState::initial();
        for key in [StateKey::AuditLogged, StateKey::RecommendationGenerated] {
            state.set(key, StateValue::Flag(true)).unwrap();
        }
        assert!(intent.goal.predicate().satisfied_by(&state));
        assert!(!GoalVariant::FullAnalysis.predicate().satisfied_by(&state));
    }
}
