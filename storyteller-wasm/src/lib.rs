//! WASM bindings for storyteller-rag, for the browser demo.

use wasm_bindgen::prelude::*;

use storyteller_rag::{ErrorKind, Pipeline, PipelineError, Stage, EXAMPLE_REQUESTS};

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome {
    Story {
        story: String,
        passages: Vec<String>,
    },
    Failed {
        stage: Stage,
        kind: &'static str,
        message: String,
        /// Echoed back so the page can offer to resubmit it.
        question: String,
    },
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ModelUnavailable => "model_unavailable",
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::GenerationFailed => "generation_failed",
        ErrorKind::Internal => "internal",
    }
}

impl From<PipelineError> for Outcome {
    fn from(e: PipelineError) -> Self {
        Outcome::Failed {
            stage: e.stage,
            kind: kind_label(e.kind()),
            message: e.source.to_string(),
            question: e.question,
        }
    }
}

// ---------------------------------------------------------------------------
// Storyteller: the main exported struct
// ---------------------------------------------------------------------------
/// Holds the pipeline for the page's lifetime. The pipeline is built on
/// first use so constructing the handle never blocks the page.
#[wasm_bindgen]
pub struct Storyteller {
    pipeline: Option<Pipeline>,
    top_k: Option<usize>,
}

#[wasm_bindgen]
impl Storyteller {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Storyteller {
        Storyteller {
            pipeline: None,
            top_k: None,
        }
    }

    /// A storyteller that retrieves `top_k` passages per request.
    pub fn with_top_k(top_k: usize) -> Storyteller {
        Storyteller {
            pipeline: None,
            top_k: Some(top_k),
        }
    }

    /// Build the pipeline now instead of on the first request.
    pub fn warm_up(&mut self) -> Result<(), JsError> {
        self.pipeline().map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    fn pipeline(&mut self) -> Result<&Pipeline, JsError> {
        if self.pipeline.is_none() {
            let mut builder = Pipeline::builder();
            if let Some(k) = self.top_k {
                builder = builder.top_k(k);
            }
            let built = builder
                .build()
                .map_err(|e| JsError::new(&format!("Pipeline build error: {e}")))?;
            self.pipeline = Some(built);
        }
        self.pipeline
            .as_ref()
            .ok_or_else(|| JsError::new("Pipeline unavailable"))
    }

    /// Tell a story. Errors carry the failing stage in their message.
    pub fn invoke(&mut self, question: &str) -> Result<String, JsError> {
        self.pipeline()?
            .invoke(question)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Tell a story and report the outcome as JSON.
    ///
    /// ```json
    /// { "status": "story", "story": "...", "passages": ["kitsune", "trojan_war"] }
    /// { "status": "failed", "stage": "Embedding", "kind": "invalid_input",
    ///   "message": "...", "question": "" }
    /// ```
    pub fn tell(&mut self, question: &str) -> Result<String, JsError> {
        let outcome = match self.pipeline()?.invoke_traced(question) {
            Ok(query) => Outcome::Story {
                passages: query.retrieved.into_iter().map(|p| p.id).collect(),
                story: query.output,
            },
            Err(e) => Outcome::from(e),
        };
        serde_json::to_string(&outcome)
            .map_err(|e| JsError::new(&format!("Serialization error: {e}")))
    }

    /// Full record of one invocation (embedding, scored passages, prompt,
    /// story) as JSON.
    pub fn trace(&mut self, question: &str) -> Result<String, JsError> {
        let query = self
            .pipeline()?
            .invoke_traced(question)
            .map_err(|e| JsError::new(&e.to_string()))?;
        serde_json::to_string(&query)
            .map_err(|e| JsError::new(&format!("Serialization error: {e}")))
    }

    /// JSON array of the example story requests.
    pub fn examples() -> String {
        serde_json::to_string(&EXAMPLE_REQUESTS).unwrap_or_else(|_| "[]".to_string())
    }
}

impl Default for Storyteller {
    fn default() -> Self {
        Self::new()
    }
}
