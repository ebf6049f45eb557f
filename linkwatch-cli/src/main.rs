//! linkwatch: mirror source directories into destinations as they change.
//!
//! # Usage
//!
//! ```text
//! linkwatch [--config <PATH>] start [--silent]
//! linkwatch [--config <PATH>] link list [--json]
//! linkwatch [--config <PATH>] link add <id> <src> <dest> [--disabled]
//! linkwatch [--config <PATH>] link remove|enable|disable <id>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{link::LinkCommand, start::StartArgs};
use linkwatch_core::registry;

#[derive(Parser, Debug)]
#[command(
    name = "linkwatch",
    version,
    about = "Watch linked directories and mirror their changes",
    long_about = None,
)]
struct Cli {
    /// Links file to use instead of ~/.linkwatch/links.json.
    #[arg(long, global = true, env = "LINKWATCH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watcher daemon in the foreground until ctrl-c.
    Start(StartArgs),

    /// Inspect and edit the configured links.
    Link {
        #[command(subcommand)]
        command: LinkCommand,
    },
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => registry::default_config_path()
            .context("failed to locate links file"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config_path(cli.config)?;
    match cli.command {
        Commands::Start(args) => args.run(config),
        Commands::Link { command } => commands::link::run(command, &config),
    }
}
