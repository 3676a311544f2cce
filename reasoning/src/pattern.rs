use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use derma_domain::Fitzpatrick;

/// Content-derived pattern identifier (hex SHA-256). Ordering is the
/// bank's deterministic tie-break for equal similarity scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Wraps an already-computed digest string.
    #[must_use]
    pub const fn from_digest(digest: String) -> Self {
        Self(digest)
    }

    /// Hex digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured metadata carried by every pattern. `extra` is an escape
/// hatch for diagnostic fields only; filters never consult it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatternMetadata {
    /// True when this pattern supersedes an earlier one. Corrections are
    /// always new patterns; stored patterns are never rewritten.
    #[serde(default)]
    pub is_correction: bool,
    /// Relative weight applied when aggregating precedent; corrections
    /// carry a higher weight than the records they supersede.
    #[serde(default = "default_learning_weight")]
    pub learning_weight: f32,
    /// Phototype the analysed image was assessed as, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitzpatrick: Option<Fitzpatrick>,
    /// Free-form diagnostic fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_learning_weight() -> f32 {
    1.0
}

/// Pattern content as produced by the learning executor, before the bank
/// assigns the content id and normalises the embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternDraft {
    /// Task family the pattern describes (e.g. `lesion-analysis`).
    pub task_type: String,
    /// Approach taken.
    pub approach: String,
    /// Observed outcome.
    pub outcome: String,
    /// Outcome success rate in `[0, 1]`.
    pub success_rate: f32,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Structured metadata.
    pub metadata: PatternMetadata,
    /// Raw embedding of the pattern text; must match the bank dimension.
    pub embedding: Vec<f32>,
}

/// Immutable stored pattern. Never updated after `store`; corrections
/// are separate patterns with `metadata.is_correction` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningPattern {
    /// Content digest id.
    pub id: PatternId,
    /// Task family.
    pub task_type: String,
    /// Approach taken.
    pub approach: String,
    /// Observed outcome.
    pub outcome: String,
    /// Outcome success rate in `[0, 1]`.
    pub success_rate: f32,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Structured metadata.
    pub metadata: PatternMetadata,
    /// L2-normalised embedding.
    pub embedding: Vec<f32>,
}

impl ReasoningPattern {
    /// Seals a draft: clamps the success rate, normalises the embedding,
    /// and derives the content id from the sealed fields.
    #[must_use]
    pub fn seal(draft: PatternDraft) -> Self {
        let mut embedding = draft.embedding;
        normalize(&mut embedding);
        let success_rate = draft.success_rate.clamp(0.0, 1.0);
        let id = content_digest(
            &draft.task_type,
            &draft.approach,
            &draft.outcome,
            draft.timestamp,
            &embedding,
        );
        Self {
            id,
            task_type: draft.task_type,
            approach: draft.approach,
            outcome: draft.outcome,
            success_rate,
            timestamp: draft.timestamp,
            metadata: draft.metadata,
            embedding,
        }
    }
}

/// L2-normalises a vector in place. Zero vectors are left untouched.
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}

/// Cosine similarity of two already-normalised vectors.
#[must_use]
pub fn cosine(lhs: &[f32], rhs: &[f32]) -> f32 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

fn content_digest(
    task_type: &str,
    approach: &str,
    outcome: &str,
    timestamp: DateTime<Utc>,
    embedding: &[f32],
) -> PatternId {
    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update([0]);
    hasher.update(approach.as_bytes());
    hasher.update([0]);
    hasher.update(outcome.as_bytes());
    hasher.update([0]);
    hasher.update(timestamp.timestamp_millis().to_be_bytes());
    for value in embedding {
        hasher.update(value.to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    PatternId::from_digest(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(task: &str, embedding: Vec<f32>) -> PatternDraft {
        PatternDraft {
            task_type: task.into(),
            approach: "ensemble".into(),
            outcome: "benign nevus".into(),
            success_rate: 0.9,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            metadata: PatternMetadata::default(),
            embedding,
        }
    }

    #[test]
    fn seal_normalises_and_derives_id() {
        let sealed = ReasoningPattern::seal(draft("lesion-analysis", vec![3.0, 4.0]));
        let norm: f32 = sealed.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(sealed.id.as_str().len(), 64);
    }

    #[test]
    fn identical_content_yields_identical_id() {
        let a = ReasoningPattern::seal(draft("lesion-analysis", vec![1.0, 0.0]));
        let b = ReasoningPattern::seal(draft("lesion-analysis", vec![1.0, 0.0]));
        assert_eq!(a.id, b.id);
        let c = ReasoningPattern::seal(draft("fairness-review", vec![1.0, 0.0]));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn success_rate_is_clamped() {
        let mut raw = draft("lesion-analysis", vec![1.0, 0.0]);
        raw.success_rate = 7.5;
        assert!((ReasoningPattern::seal(raw).success_rate - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_of_normalised_self_is_one() {
        let sealed = ReasoningPattern::seal(draft("lesion-analysis", vec![0.2, 0.4, 0.1]));
        let score = cosine(&sealed.embedding, &sealed.embedding);
        assert!((score - 1.0).abs() < 1e-5);
    }
}
