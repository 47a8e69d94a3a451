//! Storyteller RAG: retrieval-augmented story generation.
//!
//! A story request is embedded, matched against a small folklore knowledge
//! base, folded into a storyteller prompt together with the best passages,
//! and handed to a text generator. The whole chain lives behind one
//! [`Pipeline`] handle that is built once and shared across requests.

pub mod core;
pub mod schema;

pub use crate::core::pipeline::{
    BuildError, ErrorKind, Pipeline, PipelineBuilder, PipelineError, StageError, EXAMPLE_REQUESTS,
};
pub use crate::schema::passage::{KnowledgeBase, Passage};
pub use crate::schema::query::{Query, Stage};
