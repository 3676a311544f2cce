use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fitzpatrick skin phototype.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fitzpatrick {
    /// Type I: always burns, never tans.
    I,
    /// Type II: usually burns, tans minimally.
    II,
    /// Type III: sometimes burns, tans uniformly.
    III,
    /// Type IV: burns minimally, tans well.
    IV,
    /// Type V: very rarely burns, tans profusely.
    V,
    /// Type VI: never burns.
    VI,
}

impl Fitzpatrick {
    /// Roman-numeral label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::I => "I",
            Self::II => "II",
            Self::III => "III",
            Self::IV => "IV",
            Self::V => "V",
            Self::VI => "VI",
        }
    }
}

/// Unit-interval score with total equality and ordering, usable as part of
/// a hashable canonical state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a score clamped to `[0, 1]`. NaN collapses to zero.
    #[must_use]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Score {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Value domain a state key ranges over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueDomain {
    /// Boolean progress or observation flag.
    Flag,
    /// Fitzpatrick phototype, possibly undetermined.
    Fitzpatrick,
    /// Unit-interval score.
    Score,
}

/// Closed alphabet of world-state keys. The enum is the alphabet: an
/// effect or update cannot name a key outside it.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// Input quality gate has run.
    QualityAssessed,
    /// Skin tone estimation has run.
    SkinToneDetected,
    /// Observed classifier confidence fell below the low threshold.
    IsLowConfidence,
    /// The safety calibration branch has been applied.
    SafetyCalibrated,
    /// Either calibration branch finished.
    CalibrationComplete,
    /// Image preprocessing finished.
    PreprocessingComplete,
    /// Lesion segmentation finished.
    SegmentationComplete,
    /// Feature extraction finished.
    FeaturesExtracted,
    /// Lesion classification finished.
    LesionsDetected,
    /// Saliency heatmap produced.
    ExplainabilityMapped,
    /// Reasoning-bank similarity lookup finished.
    SimilaritySearched,
    /// Risk assessment finished.
    RiskAssessed,
    /// Fairness audit finished.
    FairnessAudited,
    /// Recommendation text produced.
    RecommendationGenerated,
    /// Learning pattern committed to the reasoning bank.
    LearningCommitted,
    /// Analysis payload encrypted.
    PayloadEncrypted,
    /// Ledger entry appended.
    AuditLogged,
    /// Estimated Fitzpatrick phototype.
    FitzpatrickType,
    /// Primary classifier confidence.
    ConfidenceScore,
    /// Demographic fairness score.
    FairnessScore,
}

impl StateKey {
    /// Every key in the alphabet, in canonical order.
    pub const ALL: [Self; 20] = [
        Self::QualityAssessed,
        Self::SkinToneDetected,
        Self::IsLowConfidence,
        Self::SafetyCalibrated,
        Self::CalibrationComplete,
        Self::PreprocessingComplete,
        Self::SegmentationComplete,
        Self::FeaturesExtracted,
        Self::LesionsDetected,
        Self::ExplainabilityMapped,
        Self::SimilaritySearched,
        Self::RiskAssessed,
        Self::FairnessAudited,
        Self::RecommendationGenerated,
        Self::LearningCommitted,
        Self::PayloadEncrypted,
        Self::AuditLogged,
        Self::FitzpatrickType,
        Self::ConfidenceScore,
        Self::FairnessScore,
    ];

    /// Snake-case label matching the serialized form.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::QualityAssessed => "quality_assessed",
            Self::SkinToneDetected => "skin_tone_detected",
            Self::IsLowConfidence => "is_low_confidence",
            Self::SafetyCalibrated => "safety_calibrated",
            Self::CalibrationComplete => "calibration_complete",
            Self::PreprocessingComplete => "preprocessing_complete",
            Self::SegmentationComplete => "segmentation_complete",
            Self::FeaturesExtracted => "features_extracted",
            Self::LesionsDetected => "lesions_detected",
            Self::ExplainabilityMapped => "explainability_mapped",
            Self::SimilaritySearched => "similarity_searched",
            Self::RiskAssessed => "risk_assessed",
            Self::FairnessAudited => "fairness_audited",
            Self::RecommendationGenerated => "recommendation_generated",
            Self::LearningCommitted => "learning_committed",
            Self::PayloadEncrypted => "payload_encrypted",
            Self::AuditLogged => "audit_logged",
            Self::FitzpatrickType => "fitzpatrick_type",
            Self::ConfidenceScore => "confidence_score",
            Self::FairnessScore => "fairness_score",
        }
    }

    /// Declared value domain for the key.
    #[must_use]
    pub const fn domain(self) -> ValueDomain {
        match self {
            Self::FitzpatrickType => ValueDomain::Fitzpatrick,
            Self::ConfidenceScore | Self::FairnessScore => ValueDomain::Score,
            _ => ValueDomain::Flag,
        }
    }

    /// Whether the key is a one-way completion flag. Completion flags only
    /// move `false -> true` within a plan instance; catalogue validation
    /// rejects effects that would revert one.
    #[must_use]
    pub const fn is_completion(self) -> bool {
        !matches!(
            self,
            Self::IsLowConfidence
                | Self::FitzpatrickType
                | Self::ConfidenceScore
                | Self::FairnessScore
        ) && matches!(self.domain(), ValueDomain::Flag)
    }
}

/// Typed state value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StateValue {
    /// Boolean flag.
    Flag(bool),
    /// Fitzpatrick phototype, `None` while undetermined.
    Fitzpatrick(Option<Fitzpatrick>),
    /// Unit-interval score.
    Score(Score),
}

impl StateValue {
    /// Domain of the value.
    #[must_use]
    pub const fn domain(&self) -> ValueDomain {
        match self {
            Self::Flag(_) => ValueDomain::Flag,
            Self::Fitzpatrick(_) => ValueDomain::Fitzpatrick,
            Self::Score(_) => ValueDomain::Score,
        }
    }

    /// Convenience score constructor.
    #[must_use]
    pub fn score(value: f32) -> Self {
        Self::Score(Score::new(value))
    }
}

/// Errors raised by state mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A value of the wrong domain was assigned to a key.
    #[error("key {key:?} has domain {expected:?}, got {got:?}")]
    DomainMismatch {
        /// Key being assigned.
        key: StateKey,
        /// Declared domain.
        expected: ValueDomain,
        /// Domain of the rejected value.
        got: ValueDomain,
    },
}

/// Typed snapshot over the closed key alphabet.
///
/// The backing map is ordered, so equality, hashing, and the canonical
/// encoding are all deterministic. A `WorldState` is owned by exactly one
/// run; it is never shared across runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct WorldState {
    entries: BTreeMap<StateKey, StateValue>,
}

impl WorldState {
    /// Canonical initial state: every flag false, phototype undetermined,
    /// scores zero.
    #[must_use]
    pub fn initial() -> Self {
        let mut entries = BTreeMap::new();
        for key in StateKey::ALL {
            let value = match key.domain() {
                ValueDomain::Flag => StateValue::Flag(false),
                ValueDomain::Fitzpatrick => StateValue::Fitzpatrick(None),
                ValueDomain::Score => StateValue::score(0.0),
            };
            entries.insert(key, value);
        }
        Self { entries }
    }

    /// Assigns a value, rejecting domain mismatches.
    pub fn set(&mut self, key: StateKey, value: StateValue) -> Result<(), StateError> {
        if key.domain() != value.domain() {
            return Err(StateError::DomainMismatch {
                key,
                expected: key.domain(),
                got: value.domain(),
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Reads a value. Canonical states carry the full alphabet.
    #[must_use]
    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.entries.get(&key)
    }

    /// Reads a flag key, treating absence as false.
    #[must_use]
    pub fn flag(&self, key: StateKey) -> bool {
        matches!(self.entries.get(&key), Some(StateValue::Flag(true)))
    }

    /// Reads a score key, treating absence as zero.
    #[must_use]
    pub fn score_value(&self, key: StateKey) -> f32 {
        match self.entries.get(&key) {
            Some(StateValue::Score(score)) => score.value(),
            _ => 0.0,
        }
    }

    /// Reads the phototype key.
    #[must_use]
    pub fn fitzpatrick(&self) -> Option<Fitzpatrick> {
        match self.entries.get(&StateKey::FitzpatrickType) {
            Some(StateValue::Fitzpatrick(value)) => *value,
            _ => None,
        }
    }

    /// Iterates entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (StateKey, &StateValue)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }

    /// Canonical JSON encoding. Key order follows the alphabet, so the
    /// encoding is byte-stable for equal states and suitable for digests.
    #[must_use]
    pub fn canonical_encoding(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(state: &WorldState) -> u64 {
        let mut hasher = DefaultHasher::new();
        state.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn initial_state_covers_alphabet() {
        let state = WorldState::initial();
        for key in StateKey::ALL {
            assert!(state.get(key).is_some(), "missing {key:?}");
        }
        assert!(!state.flag(StateKey::AuditLogged));
        assert_eq!(state.fitzpatrick(), None);
    }

    #[test]
    fn domain_mismatch_rejected() {
        let mut state = WorldState::initial();
        let err = state
            .set(StateKey::ConfidenceScore, StateValue::Flag(true))
            .unwrap_err();
        assert!(matches!(err, StateError::DomainMismatch { .. }));
    }

    #[test]
    fn value_equality_and_hash_are_canonical() {
        let mut a = WorldState::initial();
        let mut b = WorldState::initial();
        a.set(StateKey::ConfidenceScore, StateValue::score(0.95))
            .unwrap();
        b.set(StateKey::ConfidenceScore, StateValue::score(0.95))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        b.set(StateKey::ConfidenceScore, StateValue::score(0.94))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_encoding_is_stable() {
        let mut a = WorldState::initial();
        a.set(StateKey::LesionsDetected, StateValue::Flag(true))
            .unwrap();
        let mut b = WorldState::initial();
        b.set(StateKey::LesionsDetected, StateValue::Flag(true))
            .unwrap();
        assert_eq!(a.canonical_encoding(), b.canonical_encoding());
        assert!(a.canonical_encoding().contains("lesions_detected"));
    }

    #[test]
    fn completion_flags_exclude_observations() {
        assert!(StateKey::CalibrationComplete.is_completion());
        assert!(StateKey::AuditLogged.is_completion());
        assert!(!StateKey::IsLowConfidence.is_completion());
        assert!(!StateKey::ConfidenceScore.is_completion());
        assert!(!StateKey::FitzpatrickType.is_completion());
    }

    #[test]
    fn score_clamps_and_orders() {
        assert_eq!(Score::new(1.5).value(), 1.0);
        assert_eq!(Score::new(-0.5).value(), 0.0);
        assert_eq!(Score::new(f32::NAN).value(), 0.0);
        assert!(Score::new(0.3) < Score::new(0.65));
    }
}
