//! Prompt templates: parsing, validation, and assembly with a length bound.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const STORYTELLER_TEMPLATE: &str = include_str!("../../story_data/prompt.txt");

/// Separator placed between retrieved passages in the context slot.
const CONTEXT_SEPARATOR: &str = "\n";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template parse error: {0}")]
    TemplateParse(String),
    #[error("template has no {{{0}}} slot")]
    MissingSlot(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("prompt needs {length} characters without any context, limit is {limit}")]
    TooLong { length: usize, limit: usize },
}

/// A named hole in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    /// Retrieved passages, best first, one per line.
    Context,
    /// The request, verbatim.
    Question,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Context => "context",
            Slot::Question => "question",
        }
    }
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// `{context}` or `{question}`.
    Slot(Slot),
}

/// The assembled prompt and how much of the context it kept.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Leading passages included; the rest were cut to fit the limit.
    pub passages_used: usize,
}

impl AssembledPrompt {
    pub fn truncated(&self, retrieved: usize) -> bool {
        self.passages_used < retrieved
    }
}

/// A parsed prompt template with both slots present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    segments: Vec<TemplateSegment>,
}

impl PromptTemplate {
    /// Parse a template string.
    ///
    /// Syntax:
    /// - `{context}` / `{question}` → `Slot`
    /// - `{{` / `}}` → literal `{` / `}`
    /// - Everything else → `Literal`
    ///
    /// Both slots must appear at least once.
    pub fn parse(input: &str) -> Result<PromptTemplate, PromptError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            if chars[i] == '{' {
                // Escaped brace
                if i + 1 < len && chars[i + 1] == '{' {
                    literal_buf.push('{');
                    i += 2;
                    continue;
                }

                if !literal_buf.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal_buf)));
                }

                let start = i + 1;
                let mut end = start;
                while end < len && chars[end] != '}' {
                    if chars[end] == '{' {
                        return Err(PromptError::TemplateParse(
                            "nested braces are not allowed".to_string(),
                        ));
                    }
                    end += 1;
                }
                if end == len {
                    return Err(PromptError::TemplateParse("unclosed brace".to_string()));
                }

                let name: String = chars[start..end].iter().collect();
                segments.push(TemplateSegment::Slot(Self::parse_slot(name.trim())?));
                i = end + 1;
            } else if chars[i] == '}' {
                if i + 1 < len && chars[i + 1] == '}' {
                    literal_buf.push('}');
                    i += 2;
                    continue;
                }
                return Err(PromptError::TemplateParse(
                    "unmatched closing brace".to_string(),
                ));
            } else {
                literal_buf.push(chars[i]);
                i += 1;
            }
        }

        if !literal_buf.is_empty() {
            segments.push(TemplateSegment::Literal(literal_buf));
        }

        let template = PromptTemplate { segments };
        for slot in [Slot::Context, Slot::Question] {
            if template.slot_count(slot) == 0 {
                return Err(PromptError::MissingSlot(slot.name()));
            }
        }
        Ok(template)
    }

    fn parse_slot(name: &str) -> Result<Slot, PromptError> {
        match name {
            "context" => Ok(Slot::Context),
            "question" => Ok(Slot::Question),
            "" => Err(PromptError::TemplateParse("empty braces".to_string())),
            other => Err(PromptError::TemplateParse(format!(
                "unknown slot '{}': expected context or question",
                other
            ))),
        }
    }

    /// The storyteller instruction used by the default pipeline.
    pub fn storyteller() -> Result<PromptTemplate, PromptError> {
        Self::parse(STORYTELLER_TEMPLATE)
    }

    /// Load a template from a text file.
    pub fn load(path: &Path) -> Result<PromptTemplate, PromptError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    fn slot_count(&self, slot: Slot) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, TemplateSegment::Slot(found) if *found == slot))
            .count()
    }

    fn literal_chars(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                TemplateSegment::Literal(text) => text.chars().count(),
                TemplateSegment::Slot(_) => 0,
            })
            .sum()
    }

    /// Fill the template with all of `context` and the question.
    pub fn render<S: AsRef<str>>(&self, context: &[S], question: &str) -> String {
        let joined = context
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(CONTEXT_SEPARATOR);

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Slot(Slot::Context) => out.push_str(&joined),
                TemplateSegment::Slot(Slot::Question) => out.push_str(question),
            }
        }
        out
    }

    /// Fill the template, keeping the result within `limit` characters.
    ///
    /// Passages are dropped from the end of `context` (lowest ranked)
    /// until the prompt fits. The question is never shortened; if it
    /// does not fit even with no context the call fails.
    pub fn assemble<S: AsRef<str>>(
        &self,
        context: &[S],
        question: &str,
        limit: Option<usize>,
    ) -> Result<AssembledPrompt, PromptError> {
        let mut passages_used = context.len();

        if let Some(limit) = limit {
            let context_slots = self.slot_count(Slot::Context);
            let fixed = self.literal_chars()
                + self.slot_count(Slot::Question) * question.chars().count();
            if fixed > limit {
                return Err(PromptError::TooLong {
                    length: fixed,
                    limit,
                });
            }

            let passage_chars: Vec<usize> =
                context.iter().map(|p| p.as_ref().chars().count()).collect();
            let context_len = |n: usize| -> usize {
                if n == 0 {
                    0
                } else {
                    passage_chars[..n].iter().sum::<usize>()
                        + (n - 1) * CONTEXT_SEPARATOR.chars().count()
                }
            };
            while passages_used > 0 && fixed + context_slots * context_len(passages_used) > limit {
                passages_used -= 1;
            }
            if passages_used < context.len() {
                warn!(
                    kept = passages_used,
                    dropped = context.len() - passages_used,
                    limit,
                    "prompt over length limit, dropped lowest-ranked passages"
                );
            }
        }

        Ok(AssembledPrompt {
            text: self.render(&context[..passages_used], question),
            passages_used,
        })
    }
}
