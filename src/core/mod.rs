pub mod config;
pub mod embedder;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
