//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod flush;
mod helpers;
mod init;
mod once;
mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "awatch")]
#[command(about = "WAF event to abuse-report forwarding worker")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./abusewatch.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and a default config file
    Init,

    /// Run scheduled reporting cycles until interrupted
    Run {
        /// Override the cycle interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run a single reporting cycle and exit
    Once,

    /// Submit everything in the bulk buffer now
    Flush,

    /// Show buffer, rate-limit, and history state
    Status,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `init` may be pointed at a config file that does not exist yet.
    if let Commands::Init = cli.command {
        let settings = match &cli.config {
            Some(path) if !path.exists() => Settings::default(),
            _ => Settings::load(cli.config.as_deref())?,
        };
        return init::cmd_init(&settings, cli.config.as_deref());
    }

    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Run { interval } => {
            if let Some(secs) = interval {
                settings.cycle.interval_secs = secs;
            }
            run::cmd_run(settings).await
        }
        Commands::Once => once::cmd_once(settings).await,
        Commands::Flush => flush::cmd_flush(settings).await,
        Commands::Status => status::cmd_status(&settings),
    }
}
