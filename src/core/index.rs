//! Exact nearest-neighbour index over passage embeddings.
//!
//! Brute force is fast enough for corpora well under 10k passages; an
//! approximate index would have to be opted into explicitly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::embedder::Embedding;
use crate::schema::passage::Passage;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector for passage '{0}' contains a non-finite value")]
    NonFinite(String),
    #[error("query vector contains a non-finite value at position {0}")]
    NonFiniteQuery(usize),
}

/// Similarity metric. The index scores queries with the metric it was
/// built with; there is no way to mix them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity, in [-1, 1].
    #[default]
    Cosine,
    /// Negated L2 distance, so that higher still means closer.
    Euclidean,
}

impl Metric {
    fn score(&self, query: &[f32], query_mag: f32, entry: &IndexEntry) -> f32 {
        match self {
            Metric::Cosine => {
                if query_mag == 0.0 || entry.magnitude == 0.0 {
                    return 0.0;
                }
                dot(query, &entry.vector) / (query_mag * entry.magnitude)
            }
            Metric::Euclidean => -euclidean_distance_squared(query, &entry.vector).sqrt(),
        }
    }
}

/// One indexed passage.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub passage: Passage,
    pub vector: Embedding,
    magnitude: f32,
}

/// A search result, borrowed from the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit<'a> {
    pub passage: &'a Passage,
    pub score: f32,
}

/// Immutable vector index. Only a fully built index is ever handed out,
/// so it always matches the knowledge base it came from.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: Metric,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build the index from passages and their embeddings, keeping the
    /// given order for tie-breaking.
    pub fn build<I>(metric: Metric, dimensions: usize, items: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (Passage, Embedding)>,
    {
        let items = items.into_iter();
        let mut entries = Vec::with_capacity(items.size_hint().0);
        for (passage, vector) in items {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(IndexError::NonFinite(passage.id));
            }
            let magnitude = magnitude(&vector);
            entries.push(IndexEntry {
                passage,
                vector,
                magnitude,
            });
        }
        Ok(Self {
            metric,
            dimensions,
            entries,
        })
    }

    /// An index with nothing in it. Every search returns no hits.
    pub fn empty(metric: Metric, dimensions: usize) -> Self {
        Self {
            metric,
            dimensions,
            entries: Vec::new(),
        }
    }

    /// The `k` passages closest to `query`, best first.
    ///
    /// Equal scores keep insertion order. `k` larger than the index
    /// returns everything ranked; `k == 0` or an empty index returns
    /// nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>, IndexError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if let Some(pos) = query.iter().position(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteQuery(pos));
        }

        let query_mag = magnitude(query);
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                passage: &entry.passage,
                score: self.metric.score(query, query_mag, entry),
            })
            .collect();

        // sort_by is stable, which gives the insertion-order tie-break.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn magnitude(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
