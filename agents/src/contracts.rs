use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use derma_domain::Fitzpatrick;

/// Generator failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The backing service cannot be reached; callers fall back to the
    /// local engine.
    #[error("generator unavailable: {reason}")]
    Unavailable {
        /// Sanitised reason.
        reason: String,
    },
    /// The service answered with output the caller cannot use.
    #[error("generator returned malformed output: {reason}")]
    Malformed {
        /// Sanitised reason.
        reason: String,
    },
}

/// LLM-like completion capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Engine label recorded in trace metadata (e.g. `local-fallback`).
    fn engine(&self) -> &'static str;
    /// Produces text for the prompt; semantics are per-call contract.
    async fn generate(&self, prompt: &str, system: Option<&str>)
        -> Result<String, GeneratorError>;
}

/// Deterministic template generator used as the offline fallback. It
/// answers with canned JSON derived from prompt keywords, which keeps
/// runs reproducible without a model in the loop.
#[derive(Debug, Clone, Default)]
pub struct LocalTemplateGenerator;

#[async_trait]
impl Generator for LocalTemplateGenerator {
    fn engine(&self) -> &'static str {
        "local-fallback"
    }

    async fn generate(
        &self,
        prompt: &str,
        _system: Option<&str>,
    ) -> Result<String, GeneratorError> {
        let lowered = prompt.to_lowercase();
        let urgency = if lowered.contains("high") {
            "Arrange a dermatology appointment within two weeks."
        } else if lowered.contains("medium") {
            "Arrange a routine dermatology review."
        } else {
            "Monitor the lesion and re-image in three months."
        };
        Ok(serde_json::json!({
            "recommendation": urgency,
            "self_care": "Photograph the area monthly and use sun protection.",
            "disclaimer": "This analysis does not replace a clinical examination.",
        })
        .to_string())
    }
}

/// Generator stub whose backing service is permanently unreachable.
/// Used to exercise the fallback chain.
#[derive(Debug, Clone, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl Generator for UnavailableGenerator {
    fn engine(&self) -> &'static str {
        "cloud"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _system: Option<&str>,
    ) -> Result<String, GeneratorError> {
        Err(GeneratorError::Unavailable {
            reason: "upstream endpoint unreachable".into(),
        })
    }
}

/// Vision failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VisionError {
    /// The specialist cannot be reached.
    #[error("vision specialist unavailable: {reason}")]
    Unavailable {
        /// Sanitised reason.
        reason: String,
    },
    /// The input could not be decoded as an image.
    #[error("vision specialist rejected the input: {reason}")]
    Rejected {
        /// Sanitised reason.
        reason: String,
    },
}

/// Pipeline variant a vision specialist is tuned for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    /// Dermoscope captures.
    Dermoscopy,
    /// Ordinary clinical photographs.
    ClinicalPhoto,
}

impl SpecialistKind {
    /// Snake-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dermoscopy => "dermoscopy",
            Self::ClinicalPhoto => "clinical_photo",
        }
    }
}

/// One classification result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    /// Label, namespaced by family (`fitzpatrick:IV`, `lesion:Melanoma`).
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
}

/// Image classification and saliency capability.
#[async_trait]
pub trait VisionSpecialist: Send + Sync {
    /// Variant this specialist serves.
    fn kind(&self) -> SpecialistKind;
    /// Classifies the image, returning scored labels across families.
    async fn classify(&self, image: &[u8]) -> Result<Vec<Classification>, VisionError>;
    /// Renders a saliency heatmap for the primary finding.
    async fn heatmap(&self, image: &[u8]) -> Result<Vec<u8>, VisionError>;
}

const LESION_LABELS: [&str; 4] = [
    "Benign Nevus",
    "Seborrheic Keratosis",
    "Basal Cell Carcinoma",
    "Melanoma",
];

/// Deterministic stand-in for a trained specialist: every output is a
/// pure function of the image digest, so identical inputs classify
/// identically across runs and platforms.
#[derive(Debug, Clone)]
pub struct HeuristicVisionSpecialist {
    kind: SpecialistKind,
}

impl HeuristicVisionSpecialist {
    /// Creates a specialist for the given pipeline variant.
    #[must_use]
    pub const fn new(kind: SpecialistKind) -> Self {
        Self { kind }
    }

    fn digest(image: &[u8]) -> [u8; 32] {
        Sha256::digest(image).into()
    }
}

#[async_trait]
impl VisionSpecialist for HeuristicVisionSpecialist {
    fn kind(&self) -> SpecialistKind {
        self.kind
    }

    async fn classify(&self, image: &[u8]) -> Result<Vec<Classification>, VisionError> {
        if image.is_empty() {
            return Err(VisionError::Rejected {
                reason: "empty image".into(),
            });
        }
        let digest = Self::digest(image);
        let phototype = match digest[0] % 6 {
            0 => Fitzpatrick::I,
            1 => Fitzpatrick::II,
            2 => Fitzpatrick::III,
            3 => Fitzpatrick::IV,
            4 => Fitzpatrick::V,
            _ => Fitzpatrick::VI,
        };
        let tone_confidence = 0.55 + f32::from(digest[1]) / 640.0;
        let mut results = vec![Classification {
            label: format!("fitzpatrick:{}", phototype.label()),
            score: tone_confidence.min(0.99),
        }];
        let primary = usize::from(digest[2]) % LESION_LABELS.len();
        let primary_score = 0.6 + f32::from(digest[3]) / 680.0;
        results.push(Classification {
            label: format!("lesion:{}", LESION_LABELS[primary]),
            score: primary_score.min(0.99),
        });
        let secondary = (primary + 1 + usize::from(digest[4]) % 3) % LESION_LABELS.len();
        results.push(Classification {
            label: format!("lesion:{}", LESION_LABELS[secondary]),
            score: (1.0 - primary_score).max(0.01),
        });
        Ok(results)
    }

    async fn heatmap(&self, image: &[u8]) -> Result<Vec<u8>, VisionError> {
        if image.is_empty() {
            return Err(VisionError::Rejected {
                reason: "empty image".into(),
            });
        }
        let digest = Self::digest(image);
        // A digest-seeded byte grid stands in for the rendered overlay.
        Ok(digest.iter().cycle().take(256).copied().collect())
    }
}

/// Time source, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
    /// Current instant as a `DateTime`.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time for tests.
#[derive(Debug, Clone)]
pub struct FixedClock {
    ms: i64,
}

impl FixedClock {
    /// Creates a clock pinned to the given epoch milliseconds.
    #[must_use]
    pub const fn new(ms: i64) -> Self {
        Self { ms }
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.ms
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.ms).unwrap_or_else(Utc::now)
    }
}

/// Identifier source, injectable for deterministic tests.
pub trait IdSource: Send + Sync {
    /// Produces a fresh unique identifier.
    fn next_id(&self) -> String;
}

/// UUID v4 identifiers.
#[derive(Debug, Clone, Default)]
pub struct UuidSource;

impl IdSource for UuidSource {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Monotonic counter identifiers for tests.
#[derive(Debug, Default)]
pub struct SequentialIdSource {
    counter: AtomicU64,
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> String {
        format!("run-{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}
