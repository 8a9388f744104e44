//! taskpilot CLI: the main entry point.
//!
//! Commands:
//! - `replay`   Run a task against a recorded model transcript
//! - `history`  Print the stored display history of a task
//! - `config`   Show, locate, or validate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "taskpilot",
    about = "taskpilot: agent task session orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task, with model turns read from a transcript file
    Replay {
        /// Transcript file; turns are separated by lines containing `---`
        transcript: PathBuf,

        /// The task given to the model
        #[arg(short, long, default_value = "Replay the recorded session")]
        task: String,

        /// Resume a stored task instead of starting a new one
        #[arg(long, value_name = "TASK_ID")]
        resume: Option<String>,

        /// Approve every command and accept every completion without asking
        #[arg(short = 'y', long)]
        auto_approve: bool,

        /// Characters per streamed chunk
        #[arg(long, default_value_t = 8)]
        chunk_size: usize,
    },

    /// Print the display history of a stored task
    History {
        /// Task id; omit to list stored tasks
        task_id: Option<String>,

        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Check the configuration for errors
    Validate,
    /// Print a config file with every default filled in
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Replay {
            transcript,
            task,
            resume,
            auto_approve,
            chunk_size,
        } => {
            let options = commands::replay::ReplayOptions {
                transcript,
                task,
                resume,
                auto_approve,
                chunk_size,
            };
            commands::replay::run(options).await?
        }
        Commands::History { task_id, json } => commands::history::run(task_id, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
        },
    }

    Ok(())
}
