use serde::{Deserialize, Serialize};

use crate::entry::SafetyLevel;

/// Confidence boundary below which a result is critically uncertain.
const CRITICAL_CONFIDENCE: f32 = 0.3;
/// Confidence boundary below which a result is flagged for review.
const REVIEW_CONFIDENCE: f32 = 0.65;

/// Deterministic inputs extracted from a run's final payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SafetySignals {
    /// A fatal error halted the run.
    pub critical_error: bool,
    /// Primary lesion label, when classification ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_lesion: Option<String>,
    /// Assessed risk label, when risk assessment ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_label: Option<String>,
    /// Final classifier confidence.
    pub confidence_score: f32,
}

/// Stamps a safety level from the final payload. The rules are fixed and
/// order-independent: HIGH on a critical error, a melanoma finding
/// assessed as high risk, or confidence below 0.3; MEDIUM on confidence
/// below 0.65; LOW otherwise.
#[must_use]
pub fn classify(signals: &SafetySignals) -> SafetyLevel {
    let melanoma_high_risk = signals
        .primary_lesion
        .as_deref()
        .is_some_and(|lesion| lesion.eq_ignore_ascii_case("melanoma"))
        && signals
            .risk_label
            .as_deref()
            .is_some_and(|risk| risk.eq_ignore_ascii_case("high"));
    if signals.critical_error
        || melanoma_high_risk
        || signals.confidence_score < CRITICAL_CONFIDENCE
    {
        SafetyLevel::High
    } else if signals.confidence_score < REVIEW_CONFIDENCE {
        SafetyLevel::Medium
    } else {
        SafetyLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confident() -> SafetySignals {
        SafetySignals {
            critical_error: false,
            primary_lesion: Some("Benign Nevus".into()),
            risk_label: Some("Low".into()),
            confidence_score: 0.95,
        }
    }

    #[test]
    fn routine_result_is_low() {
        assert_eq!(classify(&confident()), SafetyLevel::Low);
    }

    #[test]
    fn reduced_confidence_is_medium() {
        let mut signals = confident();
        signals.confidence_score = 0.5;
        assert_eq!(classify(&signals), SafetyLevel::Medium);
    }

    #[test]
    fn critical_confidence_is_high() {
        let mut signals = confident();
        signals.confidence_score = 0.25;
        assert_eq!(classify(&signals), SafetyLevel::High);
    }

    #[test]
    fn melanoma_high_risk_is_high_regardless_of_confidence() {
        let signals = SafetySignals {
            critical_error: false,
            primary_lesion: Some("Melanoma".into()),
            risk_label: Some("High".into()),
            confidence_score: 0.99,
        };
        assert_eq!(classify(&signals), SafetyLevel::High);
    }

    #[test]
    fn melanoma_with_low_risk_is_not_escalated() {
        let signals = SafetySignals {
            critical_error: false,
            primary_lesion: Some("Melanoma".into()),
            risk_label: Some("Low".into()),
            confidence_score: 0.9,
        };
        assert_eq!(classify(&signals), SafetyLevel::Low);
    }

    #[test]
    fn critical_error_is_high() {
        let signals = SafetySignals {
            critical_error: true,
            ..SafetySignals::default()
        };
        assert_eq!(classify(&signals), SafetyLevel::High);
    }

    #[test]
    fn boundaries_are_half_open() {
        let mut signals = confident();
        signals.confidence_score = 0.65;
        assert_eq!(classify(&signals), SafetyLevel::Low);
        signals.confidence_score = 0.3;
        assert_eq!(classify(&signals), SafetyLevel::Medium);
    }
}
