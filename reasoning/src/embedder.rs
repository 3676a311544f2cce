use async_trait::async_trait;
use thiserror::Error;

use crate::pattern::normalize;

/// Embedding failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbedError {
    /// The backing model is unreachable.
    #[error("embedder unavailable: {reason}")]
    Unavailable {
        /// Sanitised reason.
        reason: String,
    },
}

/// Text-to-vector capability. The dimension is fixed for the lifetime of
/// the embedder; the bank rejects mismatching embedders at construction.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Declared output dimension.
    fn dimension(&self) -> usize;
    /// Encodes text into a vector of the declared dimension.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Deterministic local embedder using signed feature hashing. Not a
/// semantic model; it gives the bank a stable, dependency-free encoding
/// for local operation and tests. Token hashing is FNV-1a, so vectors
/// are identical across platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Creates an embedder with the given output dimension.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let lowered = token.to_lowercase();
            let hash = Self::fnv1a(&lowered);
            #[allow(clippy::cast_possible_truncation)]
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}
