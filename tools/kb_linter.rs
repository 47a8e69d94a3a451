/// KB Linter: validates a knowledge base and, optionally, canned responses.
///
/// Usage: kb_linter [<knowledge_base.ron>] [--responses <path>] [--config <path>]
///
/// Checks:
/// - Passages parse, have text and unique ids
/// - Every passage embeds with the configured embedder
/// - Near-duplicate passages (cosine similarity above --duplicate-threshold)
/// - Response rules whose keyword starts with an earlier keyword (never chosen)
/// - Response keywords that appear in no passage (only matched via the request)

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use storyteller_rag::core::config::PipelineConfig;
use storyteller_rag::core::embedder::{Embedder, HashingEmbedder};
use storyteller_rag::core::generator::CannedResponses;
use storyteller_rag::KnowledgeBase;

#[derive(Parser)]
#[command(name = "kb_linter")]
#[command(version, about = "Validate storyteller knowledge base and response files", long_about = None)]
struct Cli {
    /// Knowledge base to check; the bundled folklore corpus when omitted
    knowledge_base: Option<PathBuf>,

    /// Canned responses to check against the knowledge base
    #[arg(long)]
    responses: Option<PathBuf>,

    /// Pipeline config supplying the embedder settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Similarity above which two passages are reported as near-duplicates
    #[arg(long, default_value_t = 0.9)]
    duplicate_threshold: f32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut errors = 0;
    let mut warnings = 0;

    let kb = match &cli.knowledge_base {
        Some(path) => KnowledgeBase::load_from_ron(path),
        None => KnowledgeBase::folklore(),
    };
    let kb = match kb {
        Ok(kb) => kb,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("{} passages", kb.len());
    if kb.is_empty() {
        println!("  WARN: knowledge base is empty, every request gets no context");
        warnings += 1;
    }

    let config = match &cli.config {
        Some(path) => PipelineConfig::load_from_ron(path),
        None => PipelineConfig::bundled(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let embedder = match HashingEmbedder::new(config.embedder.clone()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut vectors = Vec::with_capacity(kb.len());
    for passage in &kb {
        match embedder.embed(&passage.text) {
            Ok(v) => vectors.push((passage.id.as_str(), v)),
            Err(e) => {
                println!("  ERROR: passage '{}': {}", passage.id, e);
                errors += 1;
            }
        }
    }

    // Vectors are unit length, so the dot product is the cosine.
    for (i, (a_id, a)) in vectors.iter().enumerate() {
        for (b_id, b) in &vectors[i + 1..] {
            let sim: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            if sim > cli.duplicate_threshold {
                println!(
                    "  WARN: passages '{}' and '{}' are near-duplicates ({:.3})",
                    a_id, b_id, sim
                );
                warnings += 1;
            }
        }
    }

    if let Some(path) = &cli.responses {
        match CannedResponses::load_from_ron(path) {
            Ok(responses) => {
                println!("{} response rules", responses.rules.len());
                for (i, rule) in responses.rules.iter().enumerate() {
                    if let Some(earlier) = responses.rules[..i]
                        .iter()
                        .find(|r| rule.keyword.starts_with(r.keyword.as_str()))
                    {
                        println!(
                            "  ERROR: rule '{}' can never match, '{}' is listed earlier and matches at the same place",
                            rule.keyword, earlier.keyword
                        );
                        errors += 1;
                    }
                    if !kb.iter().any(|p| p.text.contains(rule.keyword.as_str())) {
                        println!(
                            "  WARN: keyword '{}' appears in no passage, only the request text can trigger it",
                            rule.keyword
                        );
                        warnings += 1;
                    }
                }
            }
            Err(e) => {
                println!("  ERROR: responses: {}", e);
                errors += 1;
            }
        }
    }

    println!("\n{} error(s), {} warning(s)", errors, warnings);
    if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
