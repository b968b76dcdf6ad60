//! Source watching
//!
//! A [`SourceWatcher`] owns one `notify` watcher per source root and turns
//! raw OS events into ranked [`SourceEvent`] values on a shared channel.
//!
//! ## Event mapping
//!
//! | notify kind                  | emitted                           |
//! |------------------------------|-----------------------------------|
//! | `Create(*)`                  | `Created`                         |
//! | `Modify(Data/Metadata/Any)`  | `Modified`                        |
//! | `Modify(Name(From))`         | `Removed`                         |
//! | `Modify(Name(To))`           | `Created`                         |
//! | `Modify(Name(Both))`         | `Removed` old, `Created` new      |
//! | `Modify(Name(Any/Other))`    | `Created` or `Removed` by `lstat` |
//! | `Remove(*)`                  | `Removed`                         |
//! | `Access(*)`, `Other`, `Any`  | nothing                           |
//!
//! Duplicates (a rename reported both as `From`/`To` and as `Both`) are
//! harmless: the reactor treats repeated creates and removes idempotently.
//!
//! Paths under the destination are dropped so a destination nested beside
//! the sources never feeds back into itself.

use std::path::{Path, PathBuf};

use collectfs_core::domain::{Rank, SourceSet};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::reactor::{ChangeKind, SourceEvent};
use crate::Result;

/// Watches every source root and forwards ranked change events
///
/// Dropping the watcher stops all OS-level watches.
pub struct SourceWatcher {
    watchers: Vec<(Rank, PathBuf, RecommendedWatcher)>,
}

impl SourceWatcher {
    /// Arm one recursive watch per source, all sending into `tx`
    ///
    /// Events for paths below `exclude` (normally the destination) are
    /// discarded.
    ///
    /// # Errors
    /// Returns `SyncError::Watch` if any root cannot be watched
    pub fn spawn(
        sources: &SourceSet,
        exclude: Option<&Path>,
        tx: mpsc::Sender<SourceEvent>,
    ) -> Result<Self> {
        let mut watchers = Vec::with_capacity(sources.len());

        for source in sources.iter() {
            let rank = source.rank();
            let root = source.root().to_path_buf();
            let tx = tx.clone();
            let exclude = exclude.map(Path::to_path_buf);

            let mut watcher = RecommendedWatcher::new(
                move |res: std::result::Result<notify::Event, notify::Error>| match res {
                    Ok(event) => {
                        for change in map_notify_event(&event, path_exists) {
                            if exclude.as_ref().is_some_and(|ex| change.path.starts_with(ex)) {
                                continue;
                            }
                            let change = SourceEvent::new(rank, change.kind, change.path);
                            if let Err(e) = tx.blocking_send(change) {
                                warn!(error = %e, "Failed to forward change event (receiver dropped)");
                            }
                        }
                    }
                    Err(err) => {
                        error!(%rank, error = %err, "Source watcher error");
                    }
                },
                notify::Config::default(),
            )?;

            watcher.watch(&root, RecursiveMode::Recursive)?;
            info!(%rank, root = %root.display(), "Watching source");

            watchers.push((rank, root, watcher));
        }

        Ok(Self { watchers })
    }

    /// Roots currently being watched, in rank order
    pub fn roots(&self) -> impl Iterator<Item = (Rank, &Path)> {
        self.watchers.iter().map(|(rank, root, _)| (*rank, root.as_path()))
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        for (rank, root, watcher) in &mut self.watchers {
            if let Err(e) = watcher.unwatch(root) {
                debug!(%rank, error = %e, "Unwatch failed");
            }
        }
    }
}

/// An unranked change produced from one notify event
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawChange {
    kind: ChangeKind,
    path: PathBuf,
}

impl RawChange {
    fn new(kind: ChangeKind, path: &Path) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
        }
    }
}

fn path_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Convert a `notify::Event` into zero or more changes
///
/// `exists` resolves renames the backend could not classify.
fn map_notify_event(event: &notify::Event, exists: impl Fn(&Path) -> bool) -> Vec<RawChange> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths
            .iter()
            .map(|p| RawChange::new(ChangeKind::Created, p))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [old, new, ..] => {
                debug!(old = %old.display(), new = %new.display(), "Mapped rename");
                vec![
                    RawChange::new(ChangeKind::Removed, old),
                    RawChange::new(ChangeKind::Created, new),
                ]
            }
            [only] => vec![classify_by_existence(only, &exists)],
            [] => Vec::new(),
        },

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .iter()
            .map(|p| RawChange::new(ChangeKind::Removed, p))
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .iter()
            .map(|p| RawChange::new(ChangeKind::Created, p))
            .collect(),

        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| classify_by_existence(p, &exists))
            .collect(),

        EventKind::Modify(_) => paths
            .iter()
            .map(|p| RawChange::new(ChangeKind::Modified, p))
            .collect(),

        EventKind::Remove(_) => paths
            .iter()
            .map(|p| RawChange::new(ChangeKind::Removed, p))
            .collect(),

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

fn classify_by_existence(path: &Path, exists: &impl Fn(&Path) -> bool) -> RawChange {
    if exists(path) {
        RawChange::new(ChangeKind::Created, path)
    } else {
        RawChange::new(ChangeKind::Removed, path)
    }
}
