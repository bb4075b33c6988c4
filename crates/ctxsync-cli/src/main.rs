//! ctxsync CLI - Command-line interface for ctxsync
//!
//! Provides commands for:
//! - Viewing tracking and sync status of the workspace
//! - Printing the context gathered for a file or selection
//! - Running a one-shot sync
//! - Clearing persisted metadata
//! - Inspecting configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    clear::ClearCommand, config::ConfigCommand, context::ContextCommand, status::StatusCommand,
    sync::SyncCommand, CommandContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "ctxsync", version, about = "Workspace change tracking and context sync")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show tracked and pending files of the workspace
    Status(StatusCommand),
    /// Print a file and its imports as context
    Context(ContextCommand),
    /// Upload pending files once and exit
    Sync(SyncCommand),
    /// Forget all persisted metadata for the workspace
    Clear(ClearCommand),
    /// View and check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CommandContext::new(cli.config.as_deref(), format);

    match cli.command {
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Context(cmd) => cmd.execute(&ctx).await,
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Clear(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    }
}
