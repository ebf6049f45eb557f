//! `linkwatch link list|add|remove|enable|disable`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use linkwatch_core::{
    registry::{add_link_at, load_links_at, remove_link_at, set_enabled_at},
    ConfigError, Link, LinkId, LinkSnapshot,
};

#[derive(Subcommand, Debug)]
pub enum LinkCommand {
    /// List configured links.
    List(ListArgs),

    /// Add a link from SRC to DEST (enabled unless --disabled).
    Add(AddArgs),

    /// Remove a link.
    Remove { id: String },

    /// Start watching a link.
    Enable { id: String },

    /// Stop watching a link.
    Disable { id: String },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Link identifier (e.g. "notes").
    pub id: String,

    /// Directory to watch.
    pub src: PathBuf,

    /// Directory changes are mirrored into.
    pub dest: PathBuf,

    /// Store the link without enabling it.
    #[arg(long)]
    pub disabled: bool,
}

pub fn run(command: LinkCommand, config: &Path) -> Result<()> {
    match command {
        LinkCommand::List(args) => list(config, args.json),
        LinkCommand::Add(args) => add(config, args),
        LinkCommand::Remove { id } => {
            let removed = remove_link_at(config, &LinkId::from(id.clone()))
                .with_context(|| format!("failed to remove link '{id}'"))?;
            println!("✓ Removed '{id}' ({})", describe(&removed));
            Ok(())
        }
        LinkCommand::Enable { id } => toggle(config, id, true),
        LinkCommand::Disable { id } => toggle(config, id, false),
    }
}

#[derive(Tabled)]
struct LinkRow {
    id: String,
    enabled: String,
    src: String,
    dest: String,
}

fn list(config: &Path, json: bool) -> Result<()> {
    let links = match load_links_at(config) {
        Ok(links) => links,
        Err(ConfigError::NotFound { .. }) => LinkSnapshot::new(),
        Err(err) => return Err(err).context("failed to load links"),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&links).context("failed to serialize links JSON")?
        );
        return Ok(());
    }

    if links.is_empty() {
        println!("{}", "No links configured.".bold());
        println!("Run: linkwatch link add <id> <src> <dest>");
        return Ok(());
    }

    let rows: Vec<LinkRow> = links
        .iter()
        .map(|(id, link)| LinkRow {
            id: id.to_string(),
            enabled: if link.enabled { "on" } else { "off" }.to_string(),
            src: link.src.display().to_string(),
            dest: link.dest.display().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn add(config: &Path, args: AddArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    let link = Link::new(cwd.join(&args.src), cwd.join(&args.dest), !args.disabled);
    let added = add_link_at(config, LinkId::from(args.id.clone()), link)
        .with_context(|| format!("failed to add link '{}'", args.id))?;
    println!("✓ Added '{}' ({})", args.id, describe(&added));
    Ok(())
}

fn toggle(config: &Path, id: String, enabled: bool) -> Result<()> {
    let link = set_enabled_at(config, &LinkId::from(id.clone()), enabled)
        .with_context(|| format!("failed to update link '{id}'"))?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("✓ {state} '{id}' ({})", describe(&link));
    Ok(())
}

fn describe(link: &Link) -> String {
    format!("{} -> {}", link.src.display(), link.dest.display())
}
