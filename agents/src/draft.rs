use serde::{Deserialize, Serialize};

use derma_audit::{AppendReceipt, SafetySignals};
use derma_domain::Fitzpatrick;

use crate::crypto::EncryptedPayload;

/// Assessed risk label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum RiskLabel {
    /// Routine monitoring.
    Low,
    /// Non-urgent review.
    Medium,
    /// Urgent referral.
    High,
}

impl RiskLabel {
    /// Capitalised label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// One scored lesion finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LesionFinding {
    /// Lesion label.
    pub label: String,
    /// Classifier score.
    pub score: f32,
}

/// Mutable per-run scratchpad the executors assemble the analysis in.
/// Owned by the run; the encryption agent seals whatever is present at
/// its point in the plan, and the audit agent classifies the final
/// content.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisDraft {
    /// Estimated phototype.
    pub fitzpatrick: Option<Fitzpatrick>,
    /// Current confidence estimate.
    pub confidence: Option<f32>,
    /// Segmented region count.
    pub segmentation_regions: Option<usize>,
    /// Scored findings, primary first.
    pub findings: Vec<LesionFinding>,
    /// Primary lesion label.
    pub primary_lesion: Option<String>,
    /// Reasoning-bank precedent hits consulted.
    pub precedent_hits: usize,
    /// Best precedent similarity.
    pub precedent_top_score: Option<f32>,
    /// Assessed risk.
    pub risk_label: Option<RiskLabel>,
    /// Demographic fairness score.
    pub fairness_score: Option<f32>,
    /// Patient-facing recommendation text.
    pub recommendation: Option<String>,
    /// Engine that produced the recommendation.
    pub recommendation_engine: Option<String>,
    /// Committed reasoning-pattern id.
    pub pattern_id: Option<String>,
    /// Sealed payload, set by the encryption agent.
    pub encrypted: Option<EncryptedPayload>,
    /// Ledger receipt for the run's single audit entry.
    #[serde(skip)]
    pub audit_receipt: Option<AppendReceipt>,
}

impl AnalysisDraft {
    /// Classifier inputs derived from the draft's current content.
    #[must_use]
    pub fn safety_signals(&self, critical_error: bool) -> SafetySignals {
        SafetySignals {
            critical_error,
            primary_lesion: self.primary_lesion.clone(),
            risk_label: self.risk_label.map(|label| label.label().to_string()),
            confidence_score: self.confidence.unwrap_or(0.0),
        }
    }

    /// Clinical payload serialised for encryption. This is the PHI
    /// surface: it exists only to be sealed under the run key.
    #[must_use]
    pub fn clinical_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "fitzpatrick": self.fitzpatrick.map(Fitzpatrick::label),
            "confidence": self.confidence,
            "findings": self.findings,
            "primary_lesion": self.primary_lesion,
            "risk": self.risk_label.map(RiskLabel::label),
            "fairness_score": self.fairness_score,
            "recommendation": self.recommendation,
        })
    }

    /// Non-PHI summary safe to return beside the encrypted payload.
    #[must_use]
    pub fn public_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "risk": self.risk_label.map(RiskLabel::label),
            "findings_count": self.findings.len(),
            "precedent_hits": self.precedent_hits,
            "fairness_score": self.fairness_score,
            "recommendation_engine": self.recommendation_engine,
        })
    }
}
