//! Citeflow CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: write a default config
//! - `ask`: answer a question with citations, streamed
//! - `pricing`: show the model pricing table

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "citeflow",
    about = "Citeflow: cited answers over a reference corpus",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Onboard,

    /// Ask a question
    Ask {
        /// The question
        query: String,

        /// Answer style: default, concise or rookie
        #[arg(short, long, default_value = "default")]
        mode: String,

        /// Print every event as a JSON line instead of rendered text
        #[arg(long)]
        stream: bool,

        /// JSON file with prior turns: [{"role": "user", "content": "..."}, ...]
        #[arg(long)]
        history: Option<PathBuf>,

        /// Number of passages to retrieve (at most 26)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Show model pricing, including config overrides
    Pricing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Ask {
            query,
            mode,
            stream,
            history,
            k,
        } => {
            commands::ask::run(commands::ask::AskArgs {
                query,
                mode,
                stream,
                history,
                k,
            })
            .await?
        }
        Commands::Pricing => commands::pricing::run().await?,
    }

    Ok(())
}
