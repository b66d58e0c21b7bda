//! Delve CLI: iterative web research from the terminal.
//!
//! Researches one question per invocation and prints a cited answer.

mod commands;

use anyhow::Context;
use clap::Parser;
use delve_core::{Question, ResearchAgent, RunReport};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delve: research a question on the web and answer it with citations
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Question to research (read from stdin if omitted)
    question: Option<String>,

    /// Outline section the answer must cover (repeatable)
    #[arg(short, long = "section")]
    sections: Vec<String>,

    /// Maximum policy decisions before the answer is written
    #[arg(long)]
    max_iterations: Option<usize>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Directory of local .md/.txt notes to index before researching
    #[arg(long)]
    docs: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Print the full run report as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace).await;
    }

    let mut config = delve_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.reasoner.max_iterations = max_iterations;
    }
    if let Some(docs) = &cli.docs {
        config.ingestion.local_docs_dir = Some(docs.clone());
    }
    config.validate().context("Invalid configuration")?;

    let text = match cli.question {
        Some(question) => question,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read question from stdin")?;
            buf
        }
    };
    if text.trim().is_empty() {
        anyhow::bail!("No question given. Pass it as an argument or on stdin.");
    }
    let question = Question::new(text.trim()).with_outline(cli.sections);

    let agent = ResearchAgent::from_config(&config).context("Failed to set up providers")?;
    let report = agent.run(question).await;

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.final_answer);
        if !cli.quiet {
            eprintln!("\n{}", summary_line(&report));
        }
    }

    if let Some(error) = &report.error {
        tracing::error!(error = %error, "Research did not complete");
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}

fn summary_line(report: &RunReport) -> String {
    let elapsed = report.finished_at - report.started_at;
    format!(
        "{} iterations, {} notes, {} chunks indexed, {} references in {:.1}s",
        report.iterations,
        report.notes.len(),
        report.chunks_indexed,
        report.references.len(),
        elapsed.num_milliseconds() as f64 / 1000.0
    )
}
