//! Knowledge base passages: the static corpus retrieval runs over.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const FOLKLORE_RON: &str = include_str!("../../story_data/knowledge_base.ron");

#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("passage '{0}' has no text")]
    EmptyPassage(String),
    #[error("duplicate passage id '{0}'")]
    DuplicateId(String),
}

/// An immutable unit of knowledge base text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Ordered collection of passages.
///
/// Order has no effect on similarity scores but it is the tie-breaker
/// for equal scores, so it is kept stable from load to index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KnowledgeBase {
    passages: Vec<Passage>,
}

impl KnowledgeBase {
    /// Build a knowledge base from passages, rejecting empty text and
    /// duplicate ids.
    pub fn new(passages: Vec<Passage>) -> Result<Self, KnowledgeBaseError> {
        let mut seen = FxHashSet::default();
        for passage in &passages {
            if passage.text.trim().is_empty() {
                return Err(KnowledgeBaseError::EmptyPassage(passage.id.clone()));
            }
            if !seen.insert(passage.id.as_str()) {
                return Err(KnowledgeBaseError::DuplicateId(passage.id.clone()));
            }
        }
        Ok(Self { passages })
    }

    /// Build from bare texts, numbering ids in insertion order.
    pub fn from_texts<I, S>(texts: I) -> Result<Self, KnowledgeBaseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let passages = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Passage::new(format!("passage-{}", i), text))
            .collect();
        Self::new(passages)
    }

    /// The built-in folklore corpus: Kitsune, Momotarō, the Trojan War,
    /// Anansi, El Dorado and Yggdrasil.
    pub fn folklore() -> Result<Self, KnowledgeBaseError> {
        Self::parse_ron(FOLKLORE_RON)
    }

    /// Load a knowledge base from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<Self, KnowledgeBaseError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a knowledge base from a RON list of `(id: .., text: ..)` entries.
    pub fn parse_ron(input: &str) -> Result<Self, KnowledgeBaseError> {
        let passages: Vec<Passage> = ron::from_str(input)?;
        Self::new(passages)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn get(&self, id: &str) -> Option<&Passage> {
        self.passages.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Passage> {
        self.passages.iter()
    }

    pub(crate) fn into_passages(self) -> Vec<Passage> {
        self.passages
    }
}

impl<'a> IntoIterator for &'a KnowledgeBase {
    type Item = &'a Passage;
    type IntoIter = std::slice::Iter<'a, Passage>;

    fn into_iter(self) -> Self::IntoIter {
        self.passages.iter()
    }
}
