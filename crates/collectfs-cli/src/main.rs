//! collectfs CLI - merge several directories into one overlay view
//!
//! Without `--watch` the sources are merged into the target once. With
//! `--watch` the target is kept in sync until a termination signal arrives,
//! then removed.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use collectfs_core::config::{Config, ConfigBuilder};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::{get_formatter, OutputFormat};

#[derive(Debug, Parser)]
#[command(
    name = "collectfs",
    version,
    about = "Merge ordered source directories into one overlay view"
)]
pub struct Cli {
    /// Source directory; later sources win conflicts (repeatable)
    #[arg(short = 's', long = "source", value_name = "DIR", num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Destination directory for the merged view
    #[arg(short, long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Keep the target in sync until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Load the config file and layer command-line flags on top
fn resolve_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    let mut builder = ConfigBuilder::from_config(base.clone());
    if !cli.sources.is_empty() {
        builder = builder.sources(cli.sources.clone());
    }
    if let Some(target) = &cli.target {
        builder = builder.target(target.clone());
    }
    builder = builder.watch(cli.watch || base.watch);
    match cli.verbose {
        0 => {}
        1 => builder = builder.logging_level("debug"),
        _ => builder = builder.logging_level("trace"),
    }

    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from_json_flag(cli.json);
    let formatter = get_formatter(format);

    // The nesting check needs absolute, symlink-free paths
    let config = resolve_config(&cli)?
        .resolve_paths()
        .context("Failed to resolve source and target paths")?;

    // Setup tracing; RUST_LOG wins over -v and the config level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            formatter.error(&error.to_string());
        }
        bail!("invalid configuration ({} error(s))", errors.len());
    }

    if config.watch {
        commands::watch::execute(&config, format).await
    } else {
        commands::merge::execute(&config, format).await
    }
}
