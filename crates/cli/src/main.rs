//! quicksave CLI - qs command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod locks;
mod logging;
mod system_config;
mod util;

/// quicksave - Back up every meaningful save of a scene to a webhook
#[derive(Parser)]
#[command(name = "qs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/quicksave/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scene file to track (overrides document.path)
    #[arg(long, short = 'd', global = true)]
    document: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the document and upload changed saves in the background
    Watch,
    /// Upload the current document state now
    Send {
        /// Message to send instead of the generated summary
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Show document, daemon and upload status
    Status,
    /// Show upload history
    Log {
        /// Number of entries to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// View or edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Get a single value (e.g. gate.cooldown_secs)
    Get { key: String },
    /// Set a single value
    Set { key: String, value: String },
    /// Show the config file path
    Path {
        /// Create the file with defaults if missing
        #[arg(long)]
        create: bool,
    },
    /// Print an example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `watch` adds a file layer once the state dir is known
    if !matches!(cli.command, Commands::Watch) {
        logging::init_terminal();
    }

    let args = util::GlobalArgs {
        config: cli.config,
        document: cli.document,
    };

    match cli.command {
        Commands::Watch => cmd::watch::run(&args).await,
        Commands::Send { message } => cmd::send::run(&args, message).await,
        Commands::Status => cmd::status::run(&args).await,
        Commands::Log { limit } => cmd::log::run(&args, limit).await,
        Commands::Config(command) => match command {
            ConfigCommands::List => cmd::config::run_list(&args).await,
            ConfigCommands::Get { key } => cmd::config::run_get(&args, &key).await,
            ConfigCommands::Set { key, value } => cmd::config::run_set(&args, &key, &value).await,
            ConfigCommands::Path { create } => cmd::config::run_path(&args, create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        },
    }
}
