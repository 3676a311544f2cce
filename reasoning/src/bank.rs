use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedder::{EmbedError, Embedder};
use crate::index::{SearchFilter, SearchHit, VectorIndex};
use crate::pattern::{normalize, PatternDraft, PatternId, ReasoningPattern};
use crate::store::{PatternStore, StoreError};

/// Bank construction and operation failures.
#[derive(Debug, Error)]
pub enum BankError {
    /// The embedder's dimension does not match the bank's.
    #[error("embedder dimension {embedder} does not match bank dimension {bank}")]
    EmbedderMismatch {
        /// Embedder dimension.
        embedder: usize,
        /// Configured bank dimension.
        bank: usize,
    },
    /// A pattern's embedding has the wrong dimension.
    #[error("pattern embedding dimension {got} does not match bank dimension {expected}")]
    DimensionMismatch {
        /// Configured bank dimension.
        expected: usize,
        /// Offending embedding length.
        got: usize,
    },
    /// Durable-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Query text could not be embedded.
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// The query carried neither an embedding nor text.
    #[error("search query must provide an embedding or text")]
    EmptyQuery,
}

/// Bank configuration. Every field has a documented default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BankConfig {
    /// Embedding dimension, fixed at initialisation.
    pub dimension: usize,
    /// Pattern count above which the coarse index replaces the exact
    /// scan.
    pub max_patterns_brute_force: usize,
    /// Bounded fsync interval for non-durable stores, in milliseconds.
    pub persistence_flush_interval_ms: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_patterns_brute_force: 10_000,
            persistence_flush_interval_ms: 1_000,
        }
    }
}

/// Similarity-search request. Exactly one of `embedding` / `text` is
/// consulted; an explicit embedding wins when both are present.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Pre-computed query embedding.
    pub embedding: Option<Vec<f32>>,
    /// Query text, embedded by the bank's embedder.
    pub text: Option<String>,
    /// Maximum number of hits.
    pub k: usize,
    /// Optional task-type / phototype restriction.
    pub filter: Option<SearchFilter>,
}

struct BankInner {
    store: PatternStore,
    index: VectorIndex,
}

/// Process-wide reasoning memory: an append-only durable pattern store
/// with cosine-similarity lookup.
///
/// Readers run concurrently; writes serialise on the internal lock and
/// each pattern becomes visible atomically. Patterns are immutable after
/// publication, so readers never observe partial records.
pub struct ReasoningBank {
    embedder: Arc<dyn Embedder>,
    config: BankConfig,
    inner: RwLock<BankInner>,
}

impl ReasoningBank {
    /// Opens the bank at `dir`, recovering previously stored patterns.
    /// Rejects an embedder whose dimension differs from the configured
    /// bank dimension, and any recovered pattern of a foreign dimension
    /// (which cannot happen through this API but guards hand-edited
    /// stores).
    pub fn open(
        dir: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        config: BankConfig,
    ) -> Result<Self, BankError> {
        if embedder.dimension() != config.dimension {
            return Err(BankError::EmbedderMismatch {
                embedder: embedder.dimension(),
                bank: config.dimension,
            });
        }
        let (store, patterns) = PatternStore::open(
            dir,
            Duration::from_millis(config.persistence_flush_interval_ms),
        )?;
        let mut index = VectorIndex::new(config.max_patterns_brute_force);
        for pattern in patterns {
            if pattern.embedding.len() == config.dimension {
                index.insert(pattern);
            }
        }
        Ok(Self {
            embedder,
            config,
            inner: RwLock::new(BankInner { store, index }),
        })
    }

    /// Appends a pattern, rejecting embeddings of a foreign dimension.
    /// The pattern is immutable once this returns. `durable` forces an
    /// fsync before returning; otherwise persistence rides the bounded
    /// flush interval.
    pub fn store(&self, draft: PatternDraft, durable: bool) -> Result<PatternId, BankError> {
        if draft.embedding.len() != self.config.dimension {
            return Err(BankError::DimensionMismatch {
                expected: self.config.dimension,
                got: draft.embedding.len(),
            });
        }
        let pattern = Arc::new(ReasoningPattern::seal(draft));
        let mut inner = self.inner.write();
        let known = inner.store.contains(&pattern.id);
        inner.store.append(&pattern, durable)?;
        if !known {
            inner.index.insert(Arc::clone(&pattern));
        }
        Ok(pattern.id.clone())
    }

    /// Top-`k` similarity search. Text queries are embedded first; this
    /// is one of the engine's declared suspension points.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>, BankError> {
        let mut embedding = match (query.embedding, query.text) {
            (Some(embedding), _) => {
                if embedding.len() != self.config.dimension {
                    return Err(BankError::DimensionMismatch {
                        expected: self.config.dimension,
                        got: embedding.len(),
                    });
                }
                embedding
            }
            (None, Some(text)) => self.embedder.encode(&text).await?,
            (None, None) => return Err(BankError::EmptyQuery),
        };
        normalize(&mut embedding);
        let inner = self.inner.read();
        Ok(inner.index.search(&embedding, query.k, query.filter.as_ref()))
    }

    /// Number of stored patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// True when the bank holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored patterns in append order (operator tooling).
    #[must_use]
    pub fn patterns(&self) -> Vec<Arc<ReasoningPattern>> {
        self.inner.read().index.patterns().to_vec()
    }

    /// Forces an fsync of the backing store.
    pub fn sync(&self) -> Result<(), BankError> {
        self.inner.write().store.sync()?;
        Ok(())
    }

    /// Configured embedding dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.config.dimension
    }
}
