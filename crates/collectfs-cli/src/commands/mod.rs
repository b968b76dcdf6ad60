//! Command implementations
//!
//! Each command resolves its inputs from an already-validated [`Config`]
//! and reports through the shared output formatters.
//!
//! [`Config`]: collectfs_core::config::Config

pub mod merge;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use collectfs_core::config::Config;
use collectfs_core::domain::SourceSet;

/// Source set and target taken from a validated config
pub(crate) fn overlay_inputs(config: &Config) -> Result<(SourceSet, PathBuf)> {
    let sources = SourceSet::new(config.sources.iter().cloned())
        .context("No source directories given")?;
    let target = config
        .target
        .clone()
        .context("No target directory given")?;
    Ok((sources, target))
}

/// Plural suffix for a count
pub(crate) fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
