use std::sync::Arc;

use serde::{Deserialize, Serialize};

use derma_domain::Fitzpatrick;

use crate::pattern::{cosine, ReasoningPattern};

/// Restricts a search to matching patterns.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SearchFilter {
    /// Exact task-type match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Exact phototype match on `metadata.fitzpatrick`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitzpatrick: Option<Fitzpatrick>,
}

impl SearchFilter {
    fn accepts(&self, pattern: &ReasoningPattern) -> bool {
        if let Some(task_type) = &self.task_type {
            if &pattern.task_type != task_type {
                return false;
            }
        }
        if let Some(fitzpatrick) = self.fitzpatrick {
            if pattern.metadata.fitzpatrick != Some(fitzpatrick) {
                return false;
            }
        }
        true
    }
}

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Matched pattern.
    pub pattern: Arc<ReasoningPattern>,
    /// Cosine similarity against the query, in `[-1, 1]`.
    pub score: f32,
}

struct IvfCell {
    centroid: Vec<f32>,
    members: Vec<usize>,
}

/// In-memory similarity index over normalised embeddings.
///
/// Up to `max_brute_force` patterns, queries scan every vector exactly.
/// Above that, a coarse inverted-file index is built: centroids are
/// sampled deterministically at a fixed stride, each pattern is assigned
/// to its nearest centroid, and queries probe the closest quarter of the
/// cells. Ties always break by ascending pattern id.
pub struct VectorIndex {
    patterns: Vec<Arc<ReasoningPattern>>,
    max_brute_force: usize,
    cells: Vec<IvfCell>,
    indexed_len: usize,
}

impl VectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new(max_brute_force: usize) -> Self {
        Self {
            patterns: Vec::new(),
            max_brute_force,
            cells: Vec::new(),
            indexed_len: 0,
        }
    }

    /// Number of indexed patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Adds a pattern, rebuilding the coarse index when the exact-scan
    /// threshold is crossed or enough inserts accumulated. Rebuilds
    /// happen under the writer, keeping queries read-only.
    pub fn insert(&mut self, pattern: Arc<ReasoningPattern>) {
        self.patterns.push(pattern);
        if self.patterns.len() > self.max_brute_force {
            self.ensure_cells();
        }
    }

    /// All patterns in insertion order.
    #[must_use]
    pub fn patterns(&self) -> &[Arc<ReasoningPattern>] {
        &self.patterns
    }

    /// Top-`k` patterns by cosine similarity, filtered, descending, ties
    /// by ascending id.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Vec<SearchHit> {
        let candidates: Vec<usize> = if self.patterns.len() <= self.max_brute_force {
            (0..self.patterns.len()).collect()
        } else {
            self.probe(query)
        };

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|idx| &self.patterns[idx])
            .filter(|pattern| filter.is_none_or(|f| f.accepts(pattern)))
            .map(|pattern| SearchHit {
                score: cosine(query, &pattern.embedding),
                pattern: Arc::clone(pattern),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });
        hits.truncate(k);
        hits
    }

    /// Rebuilds the coarse index when enough inserts accumulated since
    /// the last build.
    fn ensure_cells(&mut self) {
        let stale = self.cells.is_empty()
            || self.patterns.len() > self.indexed_len + self.indexed_len / 10;
        if !stale {
            return;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nlist = ((self.patterns.len() as f64).sqrt().ceil() as usize).max(1);
        let stride = (self.patterns.len() / nlist).max(1);
        let mut cells: Vec<IvfCell> = (0..nlist)
            .map(|cell| IvfCell {
                centroid: self.patterns[cell * stride].embedding.clone(),
                members: Vec::new(),
            })
            .collect();
        for (idx, pattern) in self.patterns.iter().enumerate() {
            let best = Self::nearest_cell(&cells, &pattern.embedding);
            cells[best].members.push(idx);
        }
        self.cells = cells;
        self.indexed_len = self.patterns.len();
    }

    fn nearest_cell(cells: &[IvfCell], embedding: &[f32]) -> usize {
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (idx, cell) in cells.iter().enumerate() {
            let score = cosine(&cell.centroid, embedding);
            if score > best_score {
                best_score = score;
                best = idx;
            }
        }
        best
    }

    fn probe(&self, query: &[f32]) -> Vec<usize> {
        let nprobe = (self.cells.len() / 4).max(1);
        let mut ranked: Vec<(usize, f32)> = self
            .cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (idx, cosine(&cell.centroid, query)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut members: Vec<usize> = ranked
            .into_iter()
            .take(nprobe)
            .flat_map(|(idx, _)| self.cells[idx].members.iter().copied())
            .collect();
        // Recently inserted patterns may postdate the last build; always
        // include them so a fresh store is immediately searchable.
        members.extend(self.indexed_len..self.patterns.len());
        members
    }
}
