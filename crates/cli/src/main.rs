//! CellPilot CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Talk to the persona, one message or interactively
//! - `config`  — Show, validate or locate the configuration
//! - `memory`  — Inspect stored conversation threads

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cellpilot",
    about = "CellPilot — a conversational agent for Jupyter workspaces",
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
    /// Chat with the persona
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation thread to continue
        #[arg(short, long, default_value = commands::chat::DEFAULT_THREAD)]
        thread: String,

        /// Attach a workspace file (repeatable)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,

        /// Attach a notebook cell as NOTEBOOK:CELL_ID (repeatable)
        #[arg(long = "cell", value_name = "NOTEBOOK:CELL_ID")]
        cells: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Conversation memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the configuration file path
    Path,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List stored threads, most recent first
    Threads,
    /// Print the history of one thread
    Show {
        /// Thread id
        thread: String,
    },
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
        Commands::Chat {
            message,
            thread,
            files,
            cells,
        } => commands::chat::run(message, thread, files, cells).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        Commands::Memory { action } => match action {
            MemoryAction::Threads => commands::memory::threads().await?,
            MemoryAction::Show { thread } => commands::memory::show(&thread).await?,
        },
    }

    Ok(())
}
