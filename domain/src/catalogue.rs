use std::collections::HashSet;

use thiserror::Error;

use crate::action::{Action, AgentId, FailurePolicy, StateDelta};
use crate::predicate::Predicate;
use crate::state::{StateKey, StateValue, WorldState};

/// Catalogue validation failures. All are fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogueError {
    /// Two actions share `(agent, name)`.
    #[error("duplicate action {name} for agent {agent}")]
    DuplicateAction {
        /// Agent label.
        agent: &'static str,
        /// Action name.
        name: String,
    },
    /// An action would revert a completion flag.
    #[error("action {name} reverts completion flag {key}")]
    NonMonotonicEffect {
        /// Action name.
        name: String,
        /// Offending key.
        key: &'static str,
    },
    /// An action never advances any completion flag.
    #[error("action {name} advances no completion flag")]
    NoProgress {
        /// Action name.
        name: String,
    },
    /// An action declares a non-positive cost.
    #[error("action {name} has non-positive cost {cost}")]
    NonPositiveCost {
        /// Action name.
        name: String,
        /// Declared cost.
        cost: f64,
    },
    /// A precondition clause is malformed for its key domain.
    #[error("action {name} has a malformed precondition")]
    MalformedPrecondition {
        /// Action name.
        name: String,
    },
    /// An action is unreachable from the canonical initial state under
    /// every observation variant.
    #[error("action {name} is unreachable from the canonical initial state")]
    UnreachableAction {
        /// Action name.
        name: String,
    },
    /// The canonical goal cannot be reached by the catalogue.
    #[error("canonical goal is unreachable")]
    UnreachableGoal,
    /// A catalogue agent has no registered executor.
    #[error("no executor registered for agent {agent}")]
    MissingExecutor {
        /// Agent label.
        agent: &'static str,
    },
}

/// Static, validated action set the planner searches over. Iteration
/// order is declaration order, which doubles as the planner's
/// deterministic tie-break.
#[derive(Debug, Clone)]
pub struct ActionCatalogue {
    actions: Vec<Action>,
    min_cost: f64,
}

impl ActionCatalogue {
    /// Validates and builds a catalogue. Rules (all fatal):
    ///
    /// 1. `(agent, name)` pairs are unique.
    /// 2. Effects are monotone: each action sets at least one completion
    ///    flag true and never sets one false.
    /// 3. Every action is applicable somewhere in the forward closure of
    ///    the canonical initial state (over both observation variants of
    ///    `is_low_confidence`), and the declared canonical goal is
    ///    reachable.
    /// 4. Executor coverage is checked separately at registry-closure
    ///    time via [`Self::validate_executors`].
    pub fn new(actions: Vec<Action>, canonical_goal: &Predicate) -> Result<Self, CatalogueError> {
        let mut seen: HashSet<(AgentId, &str)> = HashSet::new();
        for action in &actions {
            if !seen.insert((action.agent, action.name.as_str())) {
                return Err(CatalogueError::DuplicateAction {
                    agent: action.agent.label(),
                    name: action.name.clone(),
                });
            }
            if action.cost <= 0.0 || !action.cost.is_finite() {
                return Err(CatalogueError::NonPositiveCost {
                    name: action.name.clone(),
                    cost: action.cost,
                });
            }
            if !action.preconditions.is_well_formed() {
                return Err(CatalogueError::MalformedPrecondition {
                    name: action.name.clone(),
                });
            }
            Self::check_monotonic(action)?;
        }
        Self::check_reachability(&actions, canonical_goal)?;
        let min_cost = actions
            .iter()
            .map(|action| action.cost)
            .fold(f64::INFINITY, f64::min);
        Ok(Self { actions, min_cost })
    }

    fn check_monotonic(action: &Action) -> Result<(), CatalogueError> {
        let mut advances = false;
        for (key, value) in action.effects.entries() {
            match value {
                StateValue::Flag(true) if key.is_completion() => advances = true,
                StateValue::Flag(false) if key.is_completion() => {
                    return Err(CatalogueError::NonMonotonicEffect {
                        name: action.name.clone(),
                        key: key.label(),
                    });
                }
                _ => {}
            }
        }
        if advances {
            Ok(())
        } else {
            Err(CatalogueError::NoProgress {
                name: action.name.clone(),
            })
        }
    }

    /// Forward closure from the canonical initial state. Observation keys
    /// are runtime-determined, so the closure is taken once per
    /// observation variant and the results are unioned.
    fn check_reachability(actions: &[Action], goal: &Predicate) -> Result<(), CatalogueError> {
        let mut reachable: HashSet<usize> = HashSet::new();
        let mut goal_reached = false;
        for low_confidence in [false, true] {
            let mut state = WorldState::initial();
            let _ = state.set(StateKey::IsLowConfidence, StateValue::Flag(low_confidence));
            let mut changed = true;
            while changed {
                changed = false;
                for (idx, action) in actions.iter().enumerate() {
                    if action.applicable_in(&state) {
                        if reachable.insert(idx) {
                            changed = true;
                        }
                        let next = action.apply(&state);
                        if next != state {
                            state = next;
                            changed = true;
                        }
                    }
                }
            }
            goal_reached |= goal.satisfied_by(&state);
        }
        if let Some(action) = actions
            .iter()
            .enumerate()
            .find_map(|(idx, action)| (!reachable.contains(&idx)).then_some(action))
        {
            return Err(CatalogueError::UnreachableAction {
                name: action.name.clone(),
            });
        }
        if goal_reached || actions.is_empty() {
            Ok(())
        } else {
            Err(CatalogueError::UnreachableGoal)
        }
    }

    /// Rule 4: every catalogue agent must have a bound executor.
    pub fn validate_executors(
        &self,
        registered: &HashSet<AgentId>,
    ) -> Result<(), CatalogueError> {
        for action in &self.actions {
            if !registered.contains(&action.agent) {
                return Err(CatalogueError::MissingExecutor {
                    agent: action.agent.label(),
                });
            }
        }
        Ok(())
    }

    /// Actions in declaration order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Looks an action up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.name == name)
    }

    /// Smallest declared cost; infinity for an empty catalogue.
    #[must_use]
    pub const fn min_cost(&self) -> f64 {
        self.min_cost
    }

    /// The canonical dermatology-analysis catalogue: sixteen actions, of
    /// which the standard/safety calibration pair is an alternative
    /// branch keyed on `is_low_confidence`.
    pub fn dermatology() -> Result<Self, CatalogueError> {
        use StateKey as K;
        let actions = vec![
            Action::builder(AgentId::QualityAssessor, "quality-gate")
                .description("Reject blurred or underexposed captures before spending pipeline work")
                .effects(StateDelta::new().with_flag(K::QualityAssessed, true))
                .cost(1.0)
                .duration_hint_ms(400)
                .build(),
            Action::builder(AgentId::SkinToneDetector, "skin-tone-detection")
                .description("Estimate Fitzpatrick phototype and baseline confidence")
                .preconditions(Predicate::always().and_flag(K::QualityAssessed, true))
                .effects(StateDelta::new().with_flag(K::SkinToneDetected, true))
                .cost(1.0)
                .duration_hint_ms(800)
                .build(),
            Action::builder(AgentId::StandardCalibrator, "standard-calibration")
                .description("Calibrate thresholds for a confident skin-tone estimate")
                .preconditions(
                    Predicate::always()
                        .and_flag(K::SkinToneDetected, true)
                        .and_flag(K::IsLowConfidence, false),
                )
                .effects(StateDelta::new().with_flag(K::CalibrationComplete, true))
                .cost(1.0)
                .duration_hint_ms(600)
                .build(),
            Action::builder(AgentId::SafetyCalibrator, "safety-calibration")
                .description("Conservative calibration when the skin-tone estimate is uncertain")
                .preconditions(
                    Predicate::always()
                        .and_flag(K::SkinToneDetected, true)
                        .and_flag(K::IsLowConfidence, true),
                )
                .effects(
                    StateDelta::new()
                        .with_flag(K::SafetyCalibrated, true)
                        .with_flag(K::CalibrationComplete, true),
                )
                .cost(1.5)
                .duration_hint_ms(900)
                .build(),
            Action::builder(AgentId::Preprocessor, "preprocessing")
                .description("Normalise colour and geometry ahead of segmentation")
                .preconditions(Predicate::always().and_flag(K::CalibrationComplete, true))
                .effects(StateDelta::new().with_flag(K::PreprocessingComplete, true))
                .cost(1.0)
                .duration_hint_ms(1_200)
                .build(),
            Action::builder(AgentId::Segmenter, "segmentation")
                .description("Segment candidate lesion regions")
                .preconditions(Predicate::always().and_flag(K::PreprocessingComplete, true))
                .effects(StateDelta::new().with_flag(K::SegmentationComplete, true))
                .cost(2.0)
                .duration_hint_ms(2_500)
                .build(),
            Action::builder(AgentId::FeatureExtractor, "feature-extraction")
                .description("Extract morphology and texture features per region")
                .preconditions(Predicate::always().and_flag(K::SegmentationComplete, true))
                .effects(StateDelta::new().with_flag(K::FeaturesExtracted, true))
                .cost(1.5)
                .duration_hint_ms(1_800)
                .build(),
            Action::builder(AgentId::LesionDetector, "lesion-detection")
                .description("Classify candidate lesions")
                .preconditions(Predicate::always().and_flag(K::FeaturesExtracted, true))
                .effects(StateDelta::new().with_flag(K::LesionsDetected, true))
                .cost(2.0)
                .duration_hint_ms(2_200)
                .build(),
            Action::builder(AgentId::ExplainabilityMapper, "explainability-mapping")
                .description("Produce a saliency heatmap for the primary finding")
                .preconditions(Predicate::always().and_flag(K::LesionsDetected, true))
                .effects(StateDelta::new().with_flag(K::ExplainabilityMapped, true))
                .cost(1.0)
                .duration_hint_ms(1_500)
                .failure_policy(FailurePolicy::Skip)
                .build(),
            Action::builder(AgentId::SimilaritySearcher, "similarity-search")
                .description("Consult the reasoning bank for precedent patterns")
                .preconditions(Predicate::always().and_flag(K::LesionsDetected, true))
                .effects(StateDelta::new().with_flag(K::SimilaritySearched, true))
                .cost(1.5)
                .duration_hint_ms(1_000)
                .failure_policy(FailurePolicy::Replan)
                .build(),
            Action::builder(AgentId::RiskAssessor, "risk-assessment")
                .description("Blend classifier output with precedent into a risk label")
                .preconditions(
                    Predicate::always()
                        .and_flag(K::LesionsDetected, true)
                        .and_flag(K::SimilaritySearched, true),
                )
                .effects(StateDelta::new().with_flag(K::RiskAssessed, true))
                .cost(2.0)
                .duration_hint_ms(2_000)
                .build(),
            Action::builder(AgentId::FairnessAuditor, "fairness-audit")
                .description("Score demographic fairness of the assessment")
                .preconditions(Predicate::always().and_flag(K::RiskAssessed, true))
                .effects(StateDelta::new().with_flag(K::FairnessAudited, true))
                .cost(1.0)
                .duration_hint_ms(900)
                .build(),
            Action::builder(AgentId::RecommendationWriter, "recommendation")
                .description("Draft patient-facing next steps")
                .preconditions(Predicate::always().and_flag(K::RiskAssessed, true))
                .effects(StateDelta::new().with_flag(K::RecommendationGenerated, true))
                .cost(1.0)
                .duration_hint_ms(1_600)
                .build(),
            Action::builder(AgentId::LearningRecorder, "learning-commit")
                .description("Store the analysis as a reasoning pattern")
                .preconditions(Predicate::always().and_flag(K::RiskAssessed, true))
                .effects(StateDelta::new().with_flag(K::LearningCommitted, true))
                .cost(1.0)
                .duration_hint_ms(700)
                .build(),
            Action::builder(AgentId::PayloadEncryptor, "payload-encryption")
                .description("Encrypt the analysis payload with the run's ephemeral key")
                .preconditions(
                    Predicate::always()
                        .and_flag(K::RecommendationGenerated, true)
                        .and_flag(K::LearningCommitted, true),
                )
                .effects(StateDelta::new().with_flag(K::PayloadEncrypted, true))
                .cost(1.0)
                .duration_hint_ms(300)
                .build(),
            Action::builder(AgentId::AuditCommitter, "audit-commit")
                .description("Append the run to the hash-chained audit ledger")
                .preconditions(
                    Predicate::always()
                        .and_flag(K::PayloadEncrypted, true)
                        .and_flag(K::LearningCommitted, true),
                )
                .effects(StateDelta::new().with_flag(K::AuditLogged, true))
                .cost(1.0)
                .duration_hint_ms(500)
                .build(),
        ];
        Self::new(actions, &canonical_goal())
    }
}

/// Goal for a full analysis: audited record plus fairness, saliency, and
/// recommendation coverage.
#[must_use]
pub fn full_analysis_goal() -> Predicate {
    Predicate::always()
        .and_flag(StateKey::AuditLogged, true)
        .and_flag(StateKey::FairnessAudited, true)
        .and_flag(StateKey::ExplainabilityMapped, true)
        .and_flag(StateKey::RecommendationGenerated, true)
}

/// Goal for a quick screening pass: audited record and recommendation,
/// without the fairness and saliency stages.
#[must_use]
pub fn screening_goal() -> Predicate {
    Predicate::always()
        .and_flag(StateKey::AuditLogged, true)
        .and_flag(StateKey::RecommendationGenerated, true)
}

/// Canonical goal used by reachability validation.
#[must_use]
pub fn canonical_goal() -> Predicate {
    full_analysis_goal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dermatology_catalogue_validates() {
        let catalogue = ActionCatalogue::dermatology().unwrap();
        assert_eq!(catalogue.actions().len(), 16);
        assert!((catalogue.min_cost() - 1.0).abs() < f64::EPSILON);
        assert!(catalogue.get("safety-calibration").is_some());
    }

    #[test]
    fn duplicate_actions_rejected() {
        let action = Action::builder(AgentId::Preprocessor, "preprocessing")
            .effects(StateDelta::new().with_flag(StateKey::PreprocessingComplete, true))
            .build();
        let err = ActionCatalogue::new(vec![action.clone(), action], &Predicate::always()).unwrap_err();
        assert!(matches!(err, CatalogueError::DuplicateAction { .. }));
    }

    #[test]
    fn non_monotonic_effects_rejected() {
        let regressing = Action::builder(AgentId::Preprocessor, "undo-preprocessing")
            .effects(
                StateDelta::new()
                    .with_flag(StateKey::QualityAssessed, true)
                    .with_flag(StateKey::PreprocessingComplete, false),
            )
            .build();
        let err = ActionCatalogue::new(vec![regressing], &Predicate::always()).unwrap_err();
        assert!(matches!(
            err,
            CatalogueError::NonMonotonicEffect {
                key: "preprocessing_complete",
                ..
            }
        ));
    }

    #[test]
    fn no_progress_effects_rejected() {
        let idle = Action::builder(AgentId::Preprocessor, "observe-only")
            .effects(StateDelta::new().with(
                StateKey::ConfidenceScore,
                StateValue::score(0.5),
            ))
            .build();
        let err = ActionCatalogue::new(vec![idle], &Predicate::always()).unwrap_err();
        assert!(matches!(err, CatalogueError::NoProgress { .. }));
    }

    #[test]
    fn non_positive_cost_rejected() {
        let free = Action::builder(AgentId::Preprocessor, "free-lunch")
            .effects(StateDelta::new().with_flag(StateKey::PreprocessingComplete, true))
            .cost(0.0)
            .build();
        let err = ActionCatalogue::new(vec![free], &Predicate::always()).unwrap_err();
        assert!(matches!(err, CatalogueError::NonPositiveCost { .. }));
    }

    #[test]
    fn unreachable_action_rejected() {
        let gated = Action::builder(AgentId::AuditCommitter, "orphan-commit")
            .preconditions(Predicate::always().and_flag(StateKey::PayloadEncrypted, true))
            .effects(StateDelta::new().with_flag(StateKey::AuditLogged, true))
            .build();
        let err = ActionCatalogue::new(vec![gated], &Predicate::always()).unwrap_err();
        assert!(matches!(err, CatalogueError::UnreachableAction { .. }));
    }

    #[test]
    fn executor_coverage_checked() {
        let catalogue = ActionCatalogue::dermatology().unwrap();
        let mut registered: HashSet<AgentId> = AgentId::ALL.into_iter().collect();
        catalogue.validate_executors(&registered).unwrap();
        registered.remove(&AgentId::SafetyCalibrator);
        let err = catalogue.validate_executors(&registered).unwrap_err();
        assert!(matches!(
            err,
            CatalogueError::MissingExecutor {
                agent: "safety-calibrator"
            }
        ));
    }

    #[test]
    fn alternative_branches_are_state_exclusive() {
        let catalogue = ActionCatalogue::dermatology().unwrap();
        let mut confident = WorldState::initial();
        confident
            .set(StateKey::QualityAssessed, StateValue::Flag(true))
            .unwrap();
        confident
            .set(StateKey::SkinToneDetected, StateValue::Flag(true))
            .unwrap();
        let standard = catalogue.get("standard-calibration").unwrap();
        let safety = catalogue.get("safety-calibration").unwrap();
        assert!(standard.applicable_in(&confident));
        assert!(!safety.applicable_in(&confident));
        confident
            .set(StateKey::IsLowConfidence, StateValue::Flag(true))
            .unwrap();
        assert!(!standard.applicable_in(&confident));
        assert!(safety.applicable_in(&confident));
    }
}
