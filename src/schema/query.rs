//! The record of a single pipeline invocation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::embedder::Embedding;

/// A stage of `Pipeline::invoke`, in execution order.
///
/// An invocation walks Embedding, Searching, Assembling, Generating and
/// stops at the first stage that fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Embedding,
    Searching,
    Assembling,
    Generating,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Embedding,
        Stage::Searching,
        Stage::Assembling,
        Stage::Generating,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Embedding => "embedding",
            Stage::Searching => "searching",
            Stage::Assembling => "assembling",
            Stage::Generating => "generating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A passage returned by retrieval, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Everything one invocation produced, from the raw question to the story.
///
/// Lives for one request and is never stored by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub question: String,
    pub embedding: Embedding,
    /// Ranked best first, at most `top_k` long.
    pub retrieved: Vec<RetrievedPassage>,
    /// Number of retrieved passages that made it into the prompt.
    pub passages_used: usize,
    pub prompt: String,
    pub output: String,
}

impl Query {
    /// Retrieved passage texts in rank order.
    pub fn context(&self) -> Vec<&str> {
        self.retrieved.iter().map(|p| p.text.as_str()).collect()
    }

    pub fn top_passage_id(&self) -> Option<&str> {
        self.retrieved.first().map(|p| p.id.as_str())
    }
}
