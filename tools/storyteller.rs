//! Storyteller: one-shot demo.
//!
//! With no arguments, tells the fox and wooden-horse stories; otherwise
//! tells one story per request given on the command line.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyteller_rag::Pipeline;

const DEMO_REQUESTS: [&str; 2] = [
    "Tell me a story about a mythical fox from Japan.",
    "Write a short tale about a clever trick involving a wooden horse in an ancient war.",
];

#[derive(Parser)]
#[command(name = "storyteller")]
#[command(version, about = "Tell stories grounded in a folklore knowledge base", long_about = None)]
struct Cli {
    /// Story requests; the built-in demo requests are used when none are given
    requests: Vec<String>,

    /// Pipeline config (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Knowledge base (RON list of passages)
    #[arg(short, long)]
    knowledge_base: Option<PathBuf>,

    /// Show the assembled prompt and retrieved passages
    #[arg(long)]
    show_prompt: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut builder = Pipeline::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    if let Some(path) = &cli.knowledge_base {
        builder = builder.knowledge_base_path(path);
    }
    let pipeline = match builder.build() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not build pipeline");
            return ExitCode::FAILURE;
        }
    };

    let requests: Vec<String> = if cli.requests.is_empty() {
        DEMO_REQUESTS.iter().map(|r| r.to_string()).collect()
    } else {
        cli.requests
    };

    let mut failures = 0;
    for request in &requests {
        println!("--- Generating story for: '{}' ---", request);
        match pipeline.invoke_traced(request) {
            Ok(query) => {
                if cli.show_prompt {
                    for passage in &query.retrieved {
                        println!("[{}] score {:.3}", passage.id, passage.score);
                    }
                    println!("\n{}\n", query.prompt);
                }
                println!("{}\n", query.output);
            }
            Err(e) => {
                failures += 1;
                error!(stage = %e.stage, kind = ?e.kind(), "{}", e);
                println!("Sorry, that story could not be told. Please try again.\n");
            }
        }
    }

    info!(told = requests.len() - failures, failed = failures, "done");
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
