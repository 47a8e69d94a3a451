//! The storyteller pipeline: question → retrieval → prompt → story.
//!
//! Wires together the embedder, vector index, prompt template and
//! generator behind a single handle that is built once and then invoked
//! any number of times, from any thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::core::config::{ConfigError, PipelineConfig};
use crate::core::embedder::{EmbedError, Embedder, HashingEmbedder};
use crate::core::generator::{CannedGenerator, GenerateError, Generator, ResponsesError};
use crate::core::index::{IndexError, Metric, VectorIndex};
use crate::core::prompt::{PromptError, PromptTemplate};
use crate::core::retriever::{RetrieveError, Retriever};
use crate::schema::passage::{KnowledgeBase, KnowledgeBaseError};
use crate::schema::query::{Query, Stage};

/// Story requests offered as one-click examples by the demo front ends.
pub const EXAMPLE_REQUESTS: [&str; 3] = [
    "A story about a trickster spider from Africa",
    "A tale of a hidden city of gold",
    "A myth about the Norse world tree",
];

/// Why a pipeline could not be built.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("knowledge base error: {0}")]
    KnowledgeBase(#[from] KnowledgeBaseError),
    #[error("{0}")]
    Embedder(#[from] EmbedError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("prompt template error: {0}")]
    Prompt(#[from] PromptError),
    #[error("generator responses error: {0}")]
    Responses(#[from] ResponsesError),
}

impl BuildError {
    /// True when the embedding model could not be loaded.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, BuildError::Embedder(EmbedError::ModelUnavailable(_)))
    }
}

/// Coarse failure categories a host can branch on without reading messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ModelUnavailable,
    InvalidInput,
    GenerationFailed,
    Internal,
}

/// The underlying failure of a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

impl From<RetrieveError> for StageError {
    fn from(e: RetrieveError) -> Self {
        match e {
            RetrieveError::Embed(e) => StageError::Embed(e),
            RetrieveError::Index(e) => StageError::Index(e),
        }
    }
}

/// A failed invocation, tagged with the stage that failed.
///
/// The question is kept so the host can offer to resubmit it.
#[derive(Debug, Error)]
#[error("{stage} stage failed for {question:?}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub question: String,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    fn new(stage: Stage, question: &str, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            question: question.to_string(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.source {
            StageError::Embed(EmbedError::ModelUnavailable(_)) => ErrorKind::ModelUnavailable,
            StageError::Embed(EmbedError::InvalidInput(_)) => ErrorKind::InvalidInput,
            StageError::Prompt(PromptError::TooLong { .. }) => ErrorKind::InvalidInput,
            StageError::Generate(_) => ErrorKind::GenerationFailed,
            StageError::Index(_) | StageError::Prompt(_) => ErrorKind::Internal,
        }
    }
}

/// A built, read-only storyteller pipeline. Built via `Pipeline::builder()`
/// or `Pipeline::build()` for the bundled defaults.
pub struct Pipeline {
    retriever: Retriever,
    template: PromptTemplate,
    generator: Arc<dyn Generator>,
    max_prompt_chars: Option<usize>,
    knowledge_base_len: usize,
}

/// Builder for constructing a `Pipeline`.
pub struct PipelineBuilder {
    config_path: Option<PathBuf>,
    knowledge_base_path: Option<PathBuf>,
    responses_path: Option<PathBuf>,
    template_path: Option<PathBuf>,
    top_k: Option<usize>,
    metric: Option<Metric>,
    max_prompt_chars: Option<usize>,
    /// Directly provided config (for hosts that build it in code).
    config: Option<PipelineConfig>,
    /// Directly provided corpus.
    knowledge_base: Option<KnowledgeBase>,
    /// Directly provided embedding model.
    embedder: Option<Arc<dyn Embedder>>,
    /// Directly provided generation backend.
    generator: Option<Arc<dyn Generator>>,
    /// Directly provided template.
    template: Option<PromptTemplate>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            config_path: None,
            knowledge_base_path: None,
            responses_path: None,
            template_path: None,
            top_k: None,
            metric: None,
            max_prompt_chars: None,
            config: None,
            knowledge_base: None,
            embedder: None,
            generator: None,
            template: None,
        }
    }

    /// Build the bundled storyteller: folklore corpus, hashing embedder,
    /// cosine index, storyteller template and canned generator.
    pub fn build() -> Result<Pipeline, BuildError> {
        Self::builder().build()
    }

    /// Answer a story request.
    pub fn invoke(&self, question: &str) -> Result<String, PipelineError> {
        self.invoke_traced(question).map(|query| query.output)
    }

    /// Answer a story request and return everything produced on the way.
    pub fn invoke_traced(&self, question: &str) -> Result<Query, PipelineError> {
        let span = info_span!("invoke", question = %question);
        let _enter = span.enter();

        debug!(stage = %Stage::Embedding, "stage started");
        let embedding = self
            .retriever
            .embedder()
            .embed(question)
            .map_err(|e| PipelineError::new(Stage::Embedding, question, e))?;

        debug!(stage = %Stage::Searching, "stage started");
        let retrieved = self
            .retriever
            .search(&embedding, self.retriever.top_k())
            .map_err(|e| PipelineError::new(Stage::Searching, question, e))?;

        debug!(stage = %Stage::Assembling, passages = retrieved.len(), "stage started");
        let context: Vec<&str> = retrieved.iter().map(|p| p.text.as_str()).collect();
        let assembled = self
            .template
            .assemble(&context, question, self.max_prompt_chars)
            .map_err(|e| PipelineError::new(Stage::Assembling, question, e))?;

        debug!(stage = %Stage::Generating, prompt_chars = assembled.text.chars().count(), "stage started");
        let output = self
            .generator
            .generate(&assembled.text)
            .map_err(|e| PipelineError::new(Stage::Generating, question, e))?;

        info!(
            top = retrieved.first().map(|p| p.id.as_str()).unwrap_or("-"),
            passages_used = assembled.passages_used,
            "story generated"
        );

        Ok(Query {
            question: question.to_string(),
            embedding,
            retrieved,
            passages_used: assembled.passages_used,
            prompt: assembled.text,
            output,
        })
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    pub fn top_k(&self) -> usize {
        self.retriever.top_k()
    }

    pub fn dimensions(&self) -> usize {
        self.retriever.embedder().dimensions()
    }

    pub fn knowledge_base_len(&self) -> usize {
        self.knowledge_base_len
    }

    /// Effective prompt length limit, if any.
    pub fn max_prompt_chars(&self) -> Option<usize> {
        self.max_prompt_chars
    }
}

impl PipelineBuilder {
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn knowledge_base_path(mut self, path: impl AsRef<Path>) -> Self {
        self.knowledge_base_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn responses_path(mut self, path: impl AsRef<Path>) -> Self {
        self.responses_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn template_path(mut self, path: impl AsRef<Path>) -> Self {
        self.template_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Override the config's `top_k`.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Override the config's metric.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Override the config's prompt length limit.
    pub fn max_prompt_chars(mut self, limit: usize) -> Self {
        self.max_prompt_chars = Some(limit);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_knowledge_base(mut self, knowledge_base: KnowledgeBase) -> Self {
        self.knowledge_base = Some(knowledge_base);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        // Directly provided values win over paths, paths over bundled data.
        let mut config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => PipelineConfig::load_from_ron(path)?,
            (None, None) => PipelineConfig::bundled()?,
        };
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        if let Some(limit) = self.max_prompt_chars {
            config.max_prompt_chars = Some(limit);
        }
        config.validate()?;

        let knowledge_base = match (self.knowledge_base, &self.knowledge_base_path) {
            (Some(kb), _) => kb,
            (None, Some(path)) => KnowledgeBase::load_from_ron(path)?,
            (None, None) => KnowledgeBase::folklore()?,
        };

        let template = match (self.template, &self.template_path) {
            (Some(template), _) => template,
            (None, Some(path)) => PromptTemplate::load(path)?,
            (None, None) => PromptTemplate::storyteller()?,
        };

        let generator: Arc<dyn Generator> = match (self.generator, &self.responses_path) {
            (Some(generator), _) => generator,
            (None, Some(path)) => Arc::new(CannedGenerator::load_from_ron(path, config.seed)?),
            (None, None) => Arc::new(CannedGenerator::folklore(config.seed)?),
        };

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::new(config.embedder.clone())?),
        };

        info!(
            passages = knowledge_base.len(),
            model = embedder.model_id(),
            dimensions = embedder.dimensions(),
            "embedding knowledge base"
        );
        let texts: Vec<&str> = knowledge_base.iter().map(|p| p.text.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        let knowledge_base_len = knowledge_base.len();

        let index = VectorIndex::build(
            config.metric,
            embedder.dimensions(),
            knowledge_base.into_passages().into_iter().zip(vectors),
        )?;

        let max_prompt_chars = match (config.max_prompt_chars, generator.max_prompt_chars()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        info!(
            indexed = index.len(),
            metric = ?config.metric,
            top_k = config.top_k,
            generator = generator.name(),
            "pipeline built"
        );

        Ok(Pipeline {
            retriever: Retriever::new(embedder, index, config.top_k),
            template,
            generator,
            max_prompt_chars,
            knowledge_base_len,
        })
    }
}
