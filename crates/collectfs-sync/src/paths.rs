//! Path utilities
//!
//! Relative-path computation between a source root and an absolute path,
//! idempotent directory creation, and the atomic file install used by both
//! the one-shot merge and the live reactor.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use collectfs_core::config::resolve_path;
use collectfs_core::domain::{RelativePath, SourceSet};
use tracing::{debug, instrument};

use crate::{Result, SyncError};

/// Suffix of the sibling file a copy is staged in before the rename
const STAGING_SUFFIX: &str = ".collectfs-tmp";

/// Distinguishes staging files of concurrent installs within this process
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Path of `absolute` relative to `root`
///
/// # Errors
/// Returns `SyncError::DomainError` if `absolute` is not below `root`
pub fn relative_to(root: &Path, absolute: &Path) -> Result<RelativePath> {
    Ok(RelativePath::from_root(root, absolute)?)
}

/// Ensure `path` exists as a directory
///
/// A directory that already exists (including one created concurrently by
/// another task) is success. A failed stat only proceeds to creation when
/// the error is "not found"; any other stat error is returned.
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolve `destination` and reject it if it is, or lies inside, a source
///
/// Both sides are made absolute and symlinks are resolved, so a relative
/// destination under an absolute source is caught. The destination does not
/// need to exist yet.
///
/// # Errors
/// Returns `SyncError::NestedDestination` for a nested destination, or an
/// I/O error if a path cannot be resolved
pub async fn check_destination(sources: &SourceSet, destination: &Path) -> Result<PathBuf> {
    let roots: Vec<PathBuf> = sources.iter().map(|s| s.root().to_path_buf()).collect();
    let destination = destination.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let resolved = resolve_path(&destination)?;
        for root in roots {
            if resolved.starts_with(resolve_path(&root)?) {
                return Err(SyncError::NestedDestination {
                    destination,
                    source_root: root,
                });
            }
        }
        Ok(resolved)
    })
    .await?
}

/// Unique sibling path a copy is staged in before being renamed over `target`
///
/// The process id and a per-process counter keep two installs, or an
/// install and a source file with a similar name, from sharing a name.
fn staging_path(target: &Path) -> PathBuf {
    let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".{}.{seq}", std::process::id()));
    name.push(STAGING_SUFFIX);
    target.with_file_name(name)
}

/// Copy `from` over `to`, creating parent directories as needed
///
/// The bytes are written to a temporary sibling first and renamed into
/// place, so readers of `to` see either the old or the new content.
#[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
pub async fn install_file(from: &Path, to: &Path) -> Result<()> {
    let copy_err = |source: std::io::Error| SyncError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent() {
        ensure_dir(parent).await.map_err(copy_err)?;
    }

    let staging = staging_path(to);
    if let Err(e) = tokio::fs::copy(from, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(copy_err(e));
    }

    if let Err(e) = tokio::fs::rename(&staging, to).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(copy_err(e));
    }

    debug!("installed");
    Ok(())
}

/// Delete a destination file; a file that is already gone is success
pub async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SyncError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
