//! Retriever: query text in, ranked passages out.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::embedder::{EmbedError, Embedder, Embedding};
use crate::core::index::{IndexError, VectorIndex};
use crate::schema::query::{RetrievedPassage, Stage};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl RetrieveError {
    /// The pipeline stage this failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            RetrieveError::Embed(_) => Stage::Embedding,
            RetrieveError::Index(_) => Stage::Searching,
        }
    }
}

/// The query vector together with what it retrieved.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub embedding: Embedding,
    pub passages: Vec<RetrievedPassage>,
}

/// Embeds a query with the same model that embedded the knowledge base,
/// then searches the index.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: VectorIndex, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Texts of the `top_k` best passages, best first. An empty knowledge
    /// base yields an empty list rather than an error.
    pub fn retrieve(&self, query: &str) -> Result<Vec<String>, RetrieveError> {
        Ok(self
            .retrieve_scored(query, self.top_k)?
            .passages
            .into_iter()
            .map(|p| p.text)
            .collect())
    }

    /// Like [`Retriever::retrieve`] with an explicit `k`, keeping the
    /// embedding and scores.
    pub fn retrieve_scored(&self, query: &str, k: usize) -> Result<Retrieval, RetrieveError> {
        let embedding = self.embedder.embed(query)?;
        let passages = self.search(&embedding, k)?;
        Ok(Retrieval {
            embedding,
            passages,
        })
    }

    /// Search with an already embedded query.
    pub fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedPassage>, RetrieveError> {
        let hits = self.index.search(embedding, k)?;
        debug!(
            hits = hits.len(),
            top = hits.first().map(|h| h.passage.id.as_str()).unwrap_or("-"),
            "index searched"
        );
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedPassage {
                id: hit.passage.id.clone(),
                text: hit.passage.text.clone(),
                score: hit.score,
            })
            .collect())
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }
}
