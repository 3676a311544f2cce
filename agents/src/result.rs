use serde::{Deserialize, Serialize};
use thiserror::Error;

use derma_domain::StateDelta;

use crate::draft::{LesionFinding, RiskLabel};

/// Executor failure, already subclassified by the executor itself. The
/// engine maps the class onto the action's failure policy; reasons are
/// sanitised before they reach any trace or log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// A backing service is unreachable; the executor's own fallback
    /// chain was exhausted.
    #[error("service unavailable: {reason}")]
    Unavailable {
        /// Sanitised reason.
        reason: String,
    },
    /// The input itself is unusable; always fatal.
    #[error("input rejected: {reason}")]
    InputRejected {
        /// Sanitised reason.
        reason: String,
    },
    /// Internal executor fault; the action's policy decides.
    #[error("internal fault: {reason}")]
    InternalFault {
        /// Sanitised reason.
        reason: String,
    },
}

impl ExecutorError {
    /// Stable category label recorded in trace metadata.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::InputRejected { .. } => "input_rejected",
            Self::InternalFault { .. } => "internal_fault",
        }
    }
}

/// Calibration branch taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// Confident input, standard thresholds.
    Standard,
    /// Low-confidence input, conservative thresholds.
    Safety,
}

/// Typed metadata attached to every agent record. One variant per agent
/// family plus a generic escape hatch for diagnostic fields only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorMetadata {
    /// Quality gate measurements.
    Quality {
        /// Estimated sharpness in `[0, 1]`.
        sharpness: f32,
        /// Estimated exposure balance in `[0, 1]`.
        exposure: f32,
    },
    /// Skin-tone estimation output.
    SkinTone {
        /// Phototype label.
        fitzpatrick: String,
        /// Estimation confidence.
        confidence: f32,
        /// Whether the confidence fell below the low threshold.
        low_confidence: bool,
    },
    /// Calibration decision.
    Calibration {
        /// Branch taken.
        mode: CalibrationMode,
        /// Effective decision threshold applied downstream.
        decision_threshold: f32,
    },
    /// Preprocessing output.
    Preprocessing {
        /// Normalised width in pixels.
        width: u32,
        /// Normalised height in pixels.
        height: u32,
    },
    /// Segmentation output.
    Segmentation {
        /// Candidate region count.
        regions: usize,
        /// Inclusion threshold in force.
        threshold: f32,
    },
    /// Feature extraction output.
    Features {
        /// Length of the extracted feature vector.
        vector_len: usize,
    },
    /// Lesion classification output.
    Lesions {
        /// Scored findings, primary first.
        findings: Vec<LesionFinding>,
        /// Primary label.
        primary: String,
    },
    /// Saliency output.
    Explainability {
        /// Rendered heatmap size in bytes.
        heatmap_bytes: usize,
    },
    /// Precedent lookup output.
    Similarity {
        /// Hits returned.
        hits: usize,
        /// Best similarity, when any hit matched.
        top_score: Option<f32>,
    },
    /// Risk assessment output.
    Risk {
        /// Assessed label.
        label: RiskLabel,
        /// Blended risk score in `[0, 1]`.
        score: f32,
    },
    /// Fairness audit output.
    Fairness {
        /// Fairness score in `[0, 1]`.
        score: f32,
    },
    /// Recommendation output.
    Recommendation {
        /// Engine that produced the text.
        engine: String,
    },
    /// Learning commit output.
    Learning {
        /// Stored pattern id.
        pattern_id: String,
        /// Whether the pattern is a correction.
        correction: bool,
    },
    /// Encryption output.
    Encryption {
        /// Cipher label.
        algorithm: String,
        /// Plaintext size in bytes.
        payload_size: usize,
    },
    /// Ledger commit output.
    AuditCommit {
        /// Chain position.
        index: u64,
        /// Stamped safety level.
        safety_level: String,
        /// Persistence outcome.
        persistence: String,
    },
    /// Diagnostic fields with no schema. Never used for control flow.
    Generic {
        /// Free-form fields.
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

/// What an executor hands back to the engine. Declared action effects
/// are applied after `state_updates`, so an executor can observe and
/// annotate state but never regress a completion flag.
#[derive(Debug, Clone)]
pub struct ExecutorResult {
    /// Typed metadata for the agent record.
    pub metadata: ExecutorMetadata,
    /// Observation updates merged before the action's effects.
    pub state_updates: StateDelta,
    /// Request a replan of the remaining plan suffix.
    pub should_replan: bool,
}

impl ExecutorResult {
    /// Result with metadata only.
    #[must_use]
    pub fn of(metadata: ExecutorMetadata) -> Self {
        Self {
            metadata,
            state_updates: StateDelta::new(),
            should_replan: false,
        }
    }

    /// Attaches observation updates.
    #[must_use]
    pub fn with_updates(mut self, state_updates: StateDelta) -> Self {
        self.state_updates = state_updates;
        self
    }

    /// Flags the result as requiring a replan.
    #[must_use]
    pub const fn replan(mut self) -> Self {
        self.should_replan = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_serialises_with_kind_tag() {
        let metadata = ExecutorMetadata::Calibration {
            mode: CalibrationMode::Safety,
            decision_threshold: 0.5,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["kind"], "calibration");
        assert_eq!(value["mode"], "safety");
    }

    #[test]
    fn error_categories_are_stable() {
        assert_eq!(
            ExecutorError::Unavailable {
                reason: "x".into()
            }
            .category(),
            "unavailable"
        );
        assert_eq!(
            ExecutorError::InputRejected {
                reason: "x".into()
            }
            .category(),
            "input_rejected"
        );
        assert_eq!(
            ExecutorError::InternalFault {
                reason: "x".into()
            }
            .category(),
            "internal_fault"
        );
    }

    #[test]
    fn builder_attaches_updates_and_replan() {
        use derma_domain::StateKey;
        let result = ExecutorResult::of(ExecutorMetadata::Generic {
            fields: serde_json::Map::new(),
        })
        .with_updates(StateDelta::new().with_flag(StateKey::IsLowConfidence, true))
        .replan();
        assert!(result.should_replan);
        assert_eq!(result.state_updates.entries().len(), 1);
    }
}
