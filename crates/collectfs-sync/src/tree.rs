//! Tree enumeration and the one-shot merge
//!
//! [`enumerate`] walks a single root and returns every file below it keyed
//! by its relative path. Subdirectories are read concurrently on a
//! [`JoinSet`]; ordering across siblings is irrelevant, the resulting map is
//! complete and free of duplicates.
//!
//! [`merge_directories`] enumerates every source, folds the maps in rank
//! order so the highest-ranked provider of a path wins, and copies the
//! winners into the destination. It tracks nothing afterwards.
//!
//! ## Entry types
//!
//! Entries are classified with `stat` semantics, so a symlink to a file is
//! merged as a file. Symlinked directories are not descended into (this
//! keeps cyclic links from looping the walk). Dangling links, sockets and
//! other special entries are skipped.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use collectfs_core::domain::{RelativePath, SourceSet};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::paths::{check_destination, ensure_dir, install_file};
use crate::{Result, SyncError};

/// Relative path → absolute path of every file below a root
pub type TreeMap = BTreeMap<RelativePath, PathBuf>;

/// Result of reading a single directory
#[derive(Debug, Default)]
struct DirListing {
    files: Vec<(RelativePath, PathBuf)>,
    subdirs: Vec<RelativePath>,
}

/// Classification of a directory entry
enum EntryKind {
    File,
    Directory,
    Skipped,
}

async fn classify(path: &Path) -> std::io::Result<EntryKind> {
    let link_meta = tokio::fs::symlink_metadata(path).await?;
    if link_meta.is_dir() {
        return Ok(EntryKind::Directory);
    }
    if link_meta.is_file() {
        return Ok(EntryKind::File);
    }
    if link_meta.file_type().is_symlink() {
        return match tokio::fs::metadata(path).await {
            Ok(target) if target.is_file() => Ok(EntryKind::File),
            Ok(_) => Ok(EntryKind::Skipped),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(EntryKind::Skipped),
            Err(e) => Err(e),
        };
    }
    Ok(EntryKind::Skipped)
}

async fn read_level(root: PathBuf, base: Option<RelativePath>) -> std::io::Result<DirListing> {
    let dir = match &base {
        Some(rel) => rel.join_onto(&root),
        None => root.clone(),
    };

    let mut listing = DirListing::default();
    let mut entries = tokio::fs::read_dir(&dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let rel = match &base {
            Some(parent) => RelativePath::new(parent.as_path().join(entry.file_name())),
            None => RelativePath::new(entry.file_name()),
        };
        let Ok(rel) = rel else {
            debug!(path = %path.display(), "Skipping entry with unusable name");
            continue;
        };

        match classify(&path).await {
            Ok(EntryKind::File) => listing.files.push((rel, path)),
            Ok(EntryKind::Directory) => listing.subdirs.push(rel),
            Ok(EntryKind::Skipped) => {
                debug!(path = %path.display(), "Skipping non-file entry");
            }
            // Removed between readdir and stat
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(listing)
}

/// Walk `root` and map every file's relative path to its absolute path
///
/// # Errors
/// Returns `SyncError::Enumeration` if the root, or any directory below it,
/// cannot be read
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn enumerate(root: &Path) -> Result<TreeMap> {
    let enumeration_err = |source: std::io::Error| SyncError::Enumeration {
        root: root.to_path_buf(),
        source,
    };

    let mut files = TreeMap::new();
    let mut pending: JoinSet<std::io::Result<DirListing>> = JoinSet::new();
    pending.spawn(read_level(root.to_path_buf(), None));

    while let Some(joined) = pending.join_next().await {
        let listing = joined?.map_err(enumeration_err)?;
        files.extend(listing.files);
        for subdir in listing.subdirs {
            pending.spawn(read_level(root.to_path_buf(), Some(subdir)));
        }
    }

    debug!(files = files.len(), "Enumeration complete");
    Ok(files)
}

/// Fold per-source maps in rank order; later (higher-ranked) entries win
pub fn fold_by_rank(trees: impl IntoIterator<Item = TreeMap>) -> TreeMap {
    trees.into_iter().fold(TreeMap::new(), |mut acc, next| {
        acc.extend(next);
        acc
    })
}

/// Summary of a completed one-shot merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Number of sources that were enumerated
    pub sources: usize,
    /// Number of files written to the destination
    pub files_copied: usize,
    /// Number of source files hidden by a higher-ranked provider
    pub files_shadowed: usize,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Merge every source into `destination` once
///
/// # Errors
/// Fails if `destination` is inside a source, on the first source that
/// cannot be enumerated, or on the first file that cannot be copied
#[instrument(skip_all, fields(destination = %destination.display(), sources = sources.len()))]
pub async fn merge_directories(sources: &SourceSet, destination: &Path) -> Result<MergeSummary> {
    let started = Instant::now();
    check_destination(sources, destination).await?;
    ensure_dir(destination).await?;

    let mut walks = JoinSet::new();
    for source in sources.iter() {
        let root = source.root().to_path_buf();
        let index = source.rank().index();
        walks.spawn(async move { (index, enumerate(&root).await) });
    }

    let mut trees: Vec<Option<TreeMap>> = vec![None; sources.len()];
    while let Some(joined) = walks.join_next().await {
        let (index, tree) = joined?;
        trees[index] = Some(tree?);
    }

    let trees: Vec<TreeMap> = trees.into_iter().flatten().collect();
    let total: usize = trees.iter().map(BTreeMap::len).sum();
    let winners = fold_by_rank(trees);

    let mut copies = JoinSet::new();
    for (rel, absolute) in &winners {
        let target = rel.join_onto(destination);
        let absolute = absolute.clone();
        copies.spawn(async move { install_file(&absolute, &target).await });
    }
    while let Some(joined) = copies.join_next().await {
        joined??;
    }

    let summary = MergeSummary {
        sources: sources.len(),
        files_copied: winners.len(),
        files_shadowed: total - winners.len(),
        duration_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        files_copied = summary.files_copied,
        files_shadowed = summary.files_shadowed,
        duration_ms = summary.duration_ms,
        "Merge completed"
    );

    Ok(summary)
}
