use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;
use crate::state::{StateError, StateKey, StateValue, WorldState};

/// Identifier for every analysis agent in the catalogue. The set is
/// closed: the executor registry must bind each variant at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AgentId {
    /// Input quality gate.
    QualityAssessor,
    /// Fitzpatrick skin-tone estimation.
    SkinToneDetector,
    /// Calibration for confident inputs.
    StandardCalibrator,
    /// Conservative calibration for low-confidence inputs.
    SafetyCalibrator,
    /// Image normalisation.
    Preprocessor,
    /// Lesion segmentation.
    Segmenter,
    /// Feature extraction over segmented regions.
    FeatureExtractor,
    /// Lesion classification.
    LesionDetector,
    /// Saliency heatmap generation.
    ExplainabilityMapper,
    /// Reasoning-bank similarity lookup.
    SimilaritySearcher,
    /// Risk scoring.
    RiskAssessor,
    /// Demographic fairness audit.
    FairnessAuditor,
    /// Recommendation text generation.
    RecommendationWriter,
    /// Reasoning-bank pattern commit.
    LearningRecorder,
    /// Payload encryption.
    PayloadEncryptor,
    /// Audit-ledger commit.
    AuditCommitter,
}

impl AgentId {
    /// Every agent, in pipeline order.
    pub const ALL: [Self; 16] = [
        Self::QualityAssessor,
        Self::SkinToneDetector,
        Self::StandardCalibrator,
        Self::SafetyCalibrator,
        Self::Preprocessor,
        Self::Segmenter,
        Self::FeatureExtractor,
        Self::LesionDetector,
        Self::ExplainabilityMapper,
        Self::SimilaritySearcher,
        Self::RiskAssessor,
        Self::FairnessAuditor,
        Self::RecommendationWriter,
        Self::LearningRecorder,
        Self::PayloadEncryptor,
        Self::AuditCommitter,
    ];

    /// Kebab-case label matching the serialized form.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::QualityAssessor => "quality-assessor",
            Self::SkinToneDetector => "skin-tone-detector",
            Self::StandardCalibrator => "standard-calibrator",
            Self::SafetyCalibrator => "safety-calibrator",
            Self::Preprocessor => "preprocessor",
            Self::Segmenter => "segmenter",
            Self::FeatureExtractor => "feature-extractor",
            Self::LesionDetector => "lesion-detector",
            Self::ExplainabilityMapper => "explainability-mapper",
            Self::SimilaritySearcher => "similarity-searcher",
            Self::RiskAssessor => "risk-assessor",
            Self::FairnessAuditor => "fairness-auditor",
            Self::RecommendationWriter => "recommendation-writer",
            Self::LearningRecorder => "learning-recorder",
            Self::PayloadEncryptor => "payload-encryptor",
            Self::AuditCommitter => "audit-committer",
        }
    }
}

/// What the engine does when an executor fails or times out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt the run (default).
    #[default]
    Fatal,
    /// Replan from the current state.
    Replan,
    /// Record the failure and continue with the remaining plan.
    Skip,
}

/// Ordered partial update over the state alphabet. Applied atomically; a
/// delta cannot reference a key outside the alphabet because the key type
/// is the alphabet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StateDelta {
    entries: Vec<(StateKey, StateValue)>,
}

impl StateDelta {
    /// Empty delta.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds an assignment, validating the value domain.
    pub fn set(&mut self, key: StateKey, value: StateValue) -> Result<(), StateError> {
        if key.domain() != value.domain() {
            return Err(StateError::DomainMismatch {
                key,
                expected: key.domain(),
                got: value.domain(),
            });
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Builder-style flag assignment.
    #[must_use]
    pub fn with_flag(mut self, key: StateKey, value: bool) -> Self {
        self.entries.push((key, StateValue::Flag(value)));
        self
    }

    /// Builder-style arbitrary assignment; panics on domain mismatch, so
    /// only for statically known catalogue construction.
    #[must_use]
    pub fn with(mut self, key: StateKey, value: StateValue) -> Self {
        assert_eq!(key.domain(), value.domain(), "delta domain mismatch");
        self.entries.push((key, value));
        self
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(StateKey, StateValue)] {
        &self.entries
    }

    /// True when no assignments are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the delta to a state. Infallible for deltas built through
    /// the validating constructors.
    pub fn apply_to(&self, state: &mut WorldState) {
        for (key, value) in &self.entries {
            // Domains were validated on insertion.
            let _ = state.set(*key, value.clone());
        }
    }
}

/// Declarative record the planner searches over: preconditions, effects,
/// and a strictly positive cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Stable name, unique per agent.
    pub name: String,
    /// Agent whose executor performs the work.
    pub agent: AgentId,
    /// Operator-facing description.
    pub description: String,
    /// Conjunction that must hold before dispatch.
    pub preconditions: Predicate,
    /// Atomic state update applied after the executor succeeds.
    pub effects: StateDelta,
    /// Planning cost.
    pub cost: f64,
    /// Expected wall-clock duration, advisory only.
    pub duration_hint_ms: u64,
    /// Engine behaviour on executor failure.
    pub failure_policy: FailurePolicy,
}

impl Action {
    /// Starts a builder for the given agent and action name.
    #[must_use]
    pub fn builder(agent: AgentId, name: impl Into<String>) -> ActionBuilder {
        ActionBuilder {
            name: name.into(),
            agent,
            description: String::new(),
            preconditions: Predicate::always(),
            effects: StateDelta::new(),
            cost: 1.0,
            duration_hint_ms: 1_000,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// True when the preconditions hold in `state`.
    #[must_use]
    pub fn applicable_in(&self, state: &WorldState) -> bool {
        self.preconditions.satisfied_by(state)
    }

    /// Returns the successor state after applying the effects.
    #[must_use]
    pub fn apply(&self, state: &WorldState) -> WorldState {
        let mut next = state.clone();
        self.effects.apply_to(&mut next);
        next
    }
}

/// Builder for [`Action`].
#[derive(Debug)]
pub struct ActionBuilder {
    name: String,
    agent: AgentId,
    description: String,
    preconditions: Predicate,
    effects: StateDelta,
    cost: f64,
    duration_hint_ms: u64,
    failure_policy: FailurePolicy,
}

impl ActionBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the precondition predicate.
    #[must_use]
    pub fn preconditions(mut self, preconditions: Predicate) -> Self {
        self.preconditions = preconditions;
        self
    }

    /// Sets the effect delta.
    #[must_use]
    pub fn effects(mut self, effects: StateDelta) -> Self {
        self.effects = effects;
        self
    }

    /// Sets the cost.
    #[must_use]
    pub const fn cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Sets the duration hint.
    #[must_use]
    pub const fn duration_hint_ms(mut self, hint: u64) -> Self {
        self.duration_hint_ms = hint;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Finalizes the action.
    #[must_use]
    pub fn build(self) -> Action {
        Action {
            name: self.name,
            agent: self.agent,
            description: self.description,
            preconditions: self.preconditions,
            effects: self.effects,
            cost: self.cost,
            duration_hint_ms: self.duration_hint_ms,
            failure_policy: self.failure_policy,
        }
    }
}
