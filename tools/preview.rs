/// Preview: interactive shell for trying story requests against a pipeline.
///
/// Usage: preview [--config <path>] [--knowledge-base <path>] [--responses <path>]
///                [--template <path>] [--top-k <n>] [-v]
///
/// Commands:
///   examples       list the example requests
///   ex <n>         run example request n
///   ask <text>     tell a story
///   trace <text>   tell a story and print the full query record as JSON
///   k <n>          rebuild with a different top_k
///   help           list commands
///   quit           exit
///
/// A line that is not a command is treated as `ask <line>`.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyteller_rag::{BuildError, Pipeline, PipelineError, EXAMPLE_REQUESTS};

#[derive(Parser, Clone)]
#[command(name = "preview")]
#[command(version, about = "Interactive storyteller shell", long_about = None)]
struct Cli {
    /// Pipeline config (RON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Knowledge base (RON list of passages)
    #[arg(long)]
    knowledge_base: Option<PathBuf>,

    /// Canned generator responses (RON)
    #[arg(long)]
    responses: Option<PathBuf>,

    /// Prompt template with {context} and {question} slots
    #[arg(long)]
    template: Option<PathBuf>,

    /// Passages retrieved per request
    #[arg(long)]
    top_k: Option<usize>,

    /// Enable debug logging (shows each stage and the assembled prompt)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn build_pipeline(cli: &Cli, top_k: Option<usize>) -> Result<Pipeline, BuildError> {
    let mut builder = Pipeline::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    if let Some(path) = &cli.knowledge_base {
        builder = builder.knowledge_base_path(path);
    }
    if let Some(path) = &cli.responses {
        builder = builder.responses_path(path);
    }
    if let Some(path) = &cli.template {
        builder = builder.template_path(path);
    }
    if let Some(k) = top_k {
        builder = builder.top_k(k);
    }
    builder.build()
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut pipeline = match build_pipeline(&cli, cli.top_k) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to build pipeline: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Loaded {} passages ({}, {} dimensions), top_k = {}",
        pipeline.knowledge_base_len(),
        pipeline.retriever().embedder().model_id(),
        pipeline.dimensions(),
        pipeline.top_k()
    );
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => {
                print_help();
            }
            "examples" => {
                for (i, request) in EXAMPLE_REQUESTS.iter().enumerate() {
                    println!("  {}. {}", i + 1, request);
                }
            }
            "ex" => match rest.parse::<usize>() {
                Ok(n) if (1..=EXAMPLE_REQUESTS.len()).contains(&n) => {
                    let request = EXAMPLE_REQUESTS[n - 1];
                    println!("> {}", request);
                    tell(&pipeline, request);
                }
                _ => println!("Usage: ex <1-{}>", EXAMPLE_REQUESTS.len()),
            },
            "ask" => {
                tell(&pipeline, rest);
            }
            "trace" => match pipeline.invoke_traced(rest) {
                Ok(query) => match serde_json::to_string_pretty(&query) {
                    Ok(json) => println!("{}\n", json),
                    Err(e) => println!("Could not serialize query: {}", e),
                },
                Err(e) => report(&e),
            },
            "k" => match rest.parse::<usize>() {
                Ok(k) => match build_pipeline(&cli, Some(k)) {
                    Ok(rebuilt) => {
                        pipeline = rebuilt;
                        println!("top_k set to {}", k);
                    }
                    Err(e) => println!("Rebuild failed, keeping previous pipeline: {}", e),
                },
                Err(_) => println!("Invalid k: '{}'", rest),
            },
            _ => {
                tell(&pipeline, line);
            }
        }
    }
}

fn tell(pipeline: &Pipeline, request: &str) {
    match pipeline.invoke_traced(request) {
        Ok(query) => {
            let ids: Vec<String> = query
                .retrieved
                .iter()
                .map(|p| format!("{} ({:.3})", p.id, p.score))
                .collect();
            if ids.is_empty() {
                println!("[no context retrieved]");
            } else {
                println!("[context: {}]", ids.join(", "));
            }
            if query.passages_used < query.retrieved.len() {
                println!(
                    "[prompt limit kept {} of {} passages]",
                    query.passages_used,
                    query.retrieved.len()
                );
            }
            println!("\n{}\n", query.output);
        }
        Err(e) => report(&e),
    }
}

fn report(e: &PipelineError) {
    println!("Could not tell that story ({:?} at the {} stage): {}", e.kind(), e.stage, e.source);
    println!("You can try the request again.\n");
}

fn print_help() {
    println!("Commands:");
    println!("  examples       List the example requests");
    println!("  ex <n>         Run example request n");
    println!("  ask <text>     Tell a story (plain text works too)");
    println!("  trace <text>   Tell a story and print the query record as JSON");
    println!("  k <n>          Rebuild with n passages per request");
    println!("  help           Show this help");
    println!("  quit           Exit");
}
