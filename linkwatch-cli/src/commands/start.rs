//! `linkwatch start`: foreground daemon with console lifecycle output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use linkwatch_core::{Category, Reporter};
use linkwatch_daemon::{start_blocking, DaemonOptions};

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Suppress every lifecycle message.
    #[arg(long)]
    pub silent: bool,
}

impl StartArgs {
    pub fn run(self, config_path: PathBuf) -> Result<()> {
        let options = DaemonOptions {
            config_path,
            silent: self.silent,
        };
        start_blocking(options, Arc::new(ConsoleReporter)).context("daemon exited with error")
    }
}

/// Prints `[category] message`; errors go to stderr.
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, category: Category, message: &str) {
        let tag = format!("[{}]", category.tag());
        match category {
            Category::Error => eprintln!("{} {message}", tag.red().bold()),
            Category::WatchWarning => println!("{} {message}", tag.yellow().bold()),
            Category::Subscribe | Category::Copy => println!("{} {message}", tag.green()),
            Category::End => println!("{} {message}", tag.magenta()),
            Category::Watch | Category::WatchConfig => println!("{} {message}", tag.bright_black()),
        }
    }
}
