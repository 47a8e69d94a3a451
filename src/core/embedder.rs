//! Text embedding: the `Embedder` contract and its local implementations.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dense vector representation of a text.
pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Maps text to a fixed-dimension vector.
///
/// Implementations must be deterministic for a loaded model and must
/// never hand back a zero vector in place of an error.
pub trait Embedder: Send + Sync {
    /// Identifier of the loaded model.
    fn model_id(&self) -> &str;

    /// Dimension `D` of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Embedding, EmbedError>;

    /// Embed several texts with the same model. Fails on the first bad input.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Settings for [`HashingEmbedder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Number of hash buckets, i.e. the embedding dimension.
    pub dimensions: usize,
    /// Character n-gram length.
    pub ngram: usize,
    /// Weight of each character n-gram relative to a whole word (1.0).
    pub char_weight: f32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 512,
            ngram: 3,
            char_weight: 0.5,
        }
    }
}

/// Function words plus the phrasing people wrap story requests in
/// ("tell me a story about..."), which say nothing about the topic.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "into", "is", "it", "its", "me", "of", "on", "or", "our", "she", "so",
    "that", "the", "their", "them", "they", "this", "to", "was", "we", "were", "which", "who",
    "will", "with", "you", "your", "i", "my", "tell", "story", "stories", "tale", "tales", "write",
    "short", "about",
];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `std`'s hasher.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic feature-hashing embedder.
///
/// Each content word contributes itself and its padded character n-grams,
/// hashed into signed buckets; the result is L2-normalised. Shared n-grams
/// let "fox" land near "foxes" and "Japan" near "Japanese" without a
/// neural model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    config: EmbedderConfig,
    model_id: String,
    stop_words: FxHashSet<&'static str>,
}

impl HashingEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self, EmbedError> {
        if config.dimensions == 0 {
            return Err(EmbedError::ModelUnavailable(
                "dimensions must be positive".to_string(),
            ));
        }
        if !(2..=5).contains(&config.ngram) {
            return Err(EmbedError::ModelUnavailable(format!(
                "ngram must be between 2 and 5, got {}",
                config.ngram
            )));
        }
        if !config.char_weight.is_finite() || config.char_weight < 0.0 {
            return Err(EmbedError::ModelUnavailable(format!(
                "char_weight must be a non-negative number, got {}",
                config.char_weight
            )));
        }

        let model_id = format!("hashing-{}d-{}gram", config.dimensions, config.ngram);
        Ok(Self {
            config,
            model_id,
            stop_words: STOP_WORDS.iter().copied().collect(),
        })
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Words the vector is built from: stop words dropped and plurals
    /// folded, or every word when nothing else is left.
    fn content_words(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let content: Vec<String> = words
            .iter()
            .filter(|w| !self.stop_words.contains(*w))
            .map(|w| stem(w).to_string())
            .collect();

        if content.is_empty() {
            words.into_iter().map(str::to_string).collect()
        } else {
            content
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a64(feature.as_bytes());
        let bucket = (hash % self.config.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::InvalidInput("text is empty".to_string()));
        }

        let words = self.content_words(text);
        if words.is_empty() {
            return Err(EmbedError::InvalidInput(format!(
                "no words found in {:?}",
                text
            )));
        }

        let mut vector = vec![0.0f32; self.config.dimensions];
        let mut feature = String::new();
        for word in &words {
            feature.clear();
            feature.push_str("w:");
            feature.push_str(word);
            self.add_feature(&mut vector, &feature, 1.0);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for gram in padded.windows(self.config.ngram) {
                feature.clear();
                feature.push_str("c:");
                feature.extend(gram);
                self.add_feature(&mut vector, &feature, self.config.char_weight);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbedError::InvalidInput(format!(
                "{:?} produced no usable features",
                text
            )));
        }
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }
}

const SIBILANT_ENDINGS: [&str; 5] = ["x", "z", "ch", "sh", "ss"];

/// Fold a simple English plural ("foxes" -> "fox", "horses" -> "horse").
/// "-es" is only a plural suffix after a sibilant; otherwise just "-s" goes.
fn stem(word: &str) -> &str {
    if word.chars().count() <= 4 || word.ends_with("ss") {
        return word;
    }
    if let Some(base) = word.strip_suffix("es") {
        if SIBILANT_ENDINGS.iter().any(|end| base.ends_with(end)) {
            return base;
        }
    }
    word.strip_suffix('s').unwrap_or(word)
}

/// Sentence-transformer embeddings through fastembed (ONNX runtime).
#[cfg(feature = "fastembed")]
pub struct FastEmbedder {
    model: fastembed::TextEmbedding,
    model_id: String,
    dimensions: usize,
}

#[cfg(feature = "fastembed")]
impl FastEmbedder {
    /// Load all-MiniLM-L6-v2 (384 dimensions), downloading it on first use.
    pub fn all_minilm() -> Result<Self, EmbedError> {
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| EmbedError::ModelUnavailable(e.to_string()))?;
        Ok(Self {
            model,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
        })
    }
}

#[cfg(feature = "fastembed")]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let mut batch = self.embed_batch(&[text])?;
        batch
            .pop()
            .ok_or_else(|| EmbedError::ModelUnavailable("model returned no vector".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedError> {
        if let Some(blank) = texts.iter().find(|t| t.trim().is_empty()) {
            return Err(EmbedError::InvalidInput(format!("blank text {:?}", blank)));
        }
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::ModelUnavailable(e.to_string()))
    }
}
