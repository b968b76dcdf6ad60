//! Overlay event reactor
//!
//! The [`OverlayReactor`] turns per-source change notifications into
//! destination mutations. Every decision is derived from the
//! [`PriorityRegistry`]; the destination itself is only ever written.
//!
//! ## Transitions
//!
//! Create / modify from rank `r` for path `p`:
//! 1. record that `r` provides `p`
//! 2. if a higher rank provides `p`, stop (the destination already shows it)
//! 3. otherwise copy `r`'s file over `destination/p`
//!
//! Remove from rank `r` for path `p`:
//! 1. if a higher rank provides `p`, forget `r` and stop
//! 2. otherwise forget `r`; copy the next-highest provider over
//!    `destination/p`, or delete `destination/p` when none is left
//!
//! Each path is handled under its own async lock, so the registry update
//! and the file I/O that follows it are never interleaved with another event
//! for the same path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use collectfs_core::domain::{Rank, RelativePath, SourceSet};
use collectfs_core::ports::{IOverlayObserver, OverlayEvent, OverlayEventKind, SyncFailure};
use tracing::{debug, instrument, warn};

use crate::paths::{install_file, relative_to, remove_file};
use crate::registry::{PathLocks, PriorityRegistry};
use crate::tree::enumerate;
use crate::{Result, SyncError};

// ============================================================================
// SourceEvent
// ============================================================================

/// Kind of change reported by a source's notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A change notification for one absolute path inside one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// Rank of the source the path belongs to
    pub rank: Rank,
    pub kind: ChangeKind,
    /// Absolute path as reported by the notifier
    pub path: PathBuf,
}

impl SourceEvent {
    pub fn new(rank: Rank, kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            rank,
            kind,
            path: path.into(),
        }
    }

    pub fn created(rank: Rank, path: impl Into<PathBuf>) -> Self {
        Self::new(rank, ChangeKind::Created, path)
    }

    pub fn modified(rank: Rank, path: impl Into<PathBuf>) -> Self {
        Self::new(rank, ChangeKind::Modified, path)
    }

    pub fn removed(rank: Rank, path: impl Into<PathBuf>) -> Self {
        Self::new(rank, ChangeKind::Removed, path)
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// What the reactor did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event's source is the winner and its file was copied
    Installed { rank: Rank },
    /// A higher-ranked source owns the path; the destination was untouched
    Shadowed { winner: Rank },
    /// The winner went away and the next-highest provider was copied
    FellBack { rank: Rank },
    /// The last provider went away and the destination file was deleted
    Removed,
    /// Nothing to do (unknown path, directory metadata change, ...)
    Ignored,
    /// A directory event was expanded into per-file events
    Expanded { paths: usize },
}

// ============================================================================
// OverlayReactor
// ============================================================================

/// Applies source change events to the destination directory
pub struct OverlayReactor {
    sources: Arc<SourceSet>,
    destination: PathBuf,
    registry: Arc<PriorityRegistry>,
    locks: PathLocks,
    observer: Option<Arc<dyn IOverlayObserver>>,
}

impl OverlayReactor {
    pub fn new(sources: Arc<SourceSet>, destination: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            destination: destination.into(),
            registry: Arc::new(PriorityRegistry::new()),
            locks: PathLocks::new(),
            observer: None,
        }
    }

    /// Report applied mutations and contained failures to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn IOverlayObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &Arc<PriorityRegistry> {
        &self.registry
    }

    pub fn sources(&self) -> &Arc<SourceSet> {
        &self.sources
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Release per-path locks for paths with no event in flight
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    /// Relative path an event refers to
    ///
    /// # Errors
    /// Fails if the rank is unknown or the path is outside the source root
    pub fn relative_path(&self, event: &SourceEvent) -> Result<RelativePath> {
        let source = self.sources.get(event.rank)?;
        relative_to(source.root(), &event.path)
    }

    /// Apply one event
    ///
    /// # Errors
    /// Returns the per-path failure; registry state stays consistent and a
    /// later event for the same path corrects the destination
    #[instrument(skip(self), fields(rank = %event.rank, kind = ?event.kind, path = %event.path.display()))]
    pub async fn handle(&self, event: &SourceEvent) -> Result<Outcome> {
        let rel = self.relative_path(event)?;

        match event.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                self.apply_update(event.rank, rel, event.kind).await
            }
            ChangeKind::Removed => self.apply_removal(event.rank, rel).await,
        }
    }

    /// Apply one event, containing any failure
    ///
    /// Failures are logged and passed to the observer; the live loop uses
    /// this so a single bad path never stops processing.
    pub async fn handle_or_report(&self, event: &SourceEvent) -> Option<Outcome> {
        match self.handle(event).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                let rel = self.relative_path(event).ok();
                self.report_failure(rel, &event.path, &e);
                None
            }
        }
    }

    async fn apply_update(
        &self,
        rank: Rank,
        rel: RelativePath,
        kind: ChangeKind,
    ) -> Result<Outcome> {
        let source_path = self.sources.resolve(rank, &rel)?;

        let metadata = match tokio::fs::metadata(&source_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::Vanished(source_path));
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            let via_symlink = tokio::fs::symlink_metadata(&source_path)
                .await
                .is_ok_and(|m| m.file_type().is_symlink());
            if kind == ChangeKind::Modified || via_symlink {
                debug!(path = %rel, via_symlink, "Ignoring directory event");
                return Ok(Outcome::Ignored);
            }
            return self.expand_directory(rank, &source_path).await;
        }

        if !metadata.is_file() {
            debug!(path = %rel, "Ignoring non-file entry");
            return Ok(Outcome::Ignored);
        }

        let event_kind = match kind {
            ChangeKind::Created => OverlayEventKind::Add,
            _ => OverlayEventKind::Change,
        };
        self.apply_file(rank, &rel, &source_path, event_kind).await
    }

    async fn apply_file(
        &self,
        rank: Rank,
        rel: &RelativePath,
        source_path: &Path,
        event_kind: OverlayEventKind,
    ) -> Result<Outcome> {
        let _guard = self.locks.lock(rel).await;

        let newly_provided = self.registry.record_presence(rel, rank);

        if self.registry.is_dominated(rel, rank) {
            let winner = self.registry.winner(rel).unwrap_or(rank);
            debug!(path = %rel, %rank, %winner, "Shadowed by higher-ranked source");
            return Ok(Outcome::Shadowed { winner });
        }

        let target = rel.join_onto(&self.destination);
        if let Err(e) = install_file(source_path, &target).await {
            // A file that vanished before its first copy was never visible
            let vanished = matches!(
                tokio::fs::metadata(source_path).await,
                Err(ref io) if io.kind() == ErrorKind::NotFound
            );
            if vanished && newly_provided {
                self.registry.record_absence(rel, rank);
                return Err(SyncError::Vanished(source_path.to_path_buf()));
            }
            return Err(e);
        }
        debug!(path = %rel, %rank, "Installed from winning source");

        self.emit(event_kind, source_path, rel, &target);
        Ok(Outcome::Installed { rank })
    }

    /// A directory appeared in a source: treat every file below it as created
    async fn expand_directory(&self, rank: Rank, dir: &Path) -> Result<Outcome> {
        let root = self.sources.get(rank)?.root().to_path_buf();
        let files = enumerate(dir).await?;
        let count = files.len();

        for (_, absolute) in files {
            let rel = match relative_to(&root, &absolute) {
                Ok(rel) => rel,
                Err(e) => {
                    self.report_failure(None, &absolute, &e);
                    continue;
                }
            };
            if let Err(e) = self
                .apply_file(rank, &rel, &absolute, OverlayEventKind::Add)
                .await
            {
                self.report_failure(Some(rel), &absolute, &e);
            }
        }

        debug!(dir = %dir.display(), files = count, "Expanded directory creation");
        Ok(Outcome::Expanded { paths: count })
    }

    async fn apply_removal(&self, rank: Rank, rel: RelativePath) -> Result<Outcome> {
        if self.registry.provides(&rel, rank) {
            return self.remove_file(rank, &rel).await;
        }

        // Not a tracked file: a directory that went away takes every
        // tracked path below it with it
        let below = self.registry.provided_below(&rel, rank);
        if below.is_empty() {
            debug!(path = %rel, %rank, "Removal for untracked path ignored");
            return Ok(Outcome::Ignored);
        }

        let count = below.len();
        for child in below {
            if let Err(e) = self.remove_file(rank, &child).await {
                let source_path = self.sources.resolve(rank, &child)?;
                self.report_failure(Some(child), &source_path, &e);
            }
        }

        debug!(path = %rel, files = count, "Expanded directory removal");
        Ok(Outcome::Expanded { paths: count })
    }

    async fn remove_file(&self, rank: Rank, rel: &RelativePath) -> Result<Outcome> {
        let _guard = self.locks.lock(rel).await;

        if !self.registry.provides(rel, rank) {
            return Ok(Outcome::Ignored);
        }

        let dominated = self.registry.is_dominated(rel, rank);
        let next = self.registry.fallback(rel, rank);
        self.registry.record_absence(rel, rank);

        if dominated {
            let winner = self.registry.winner(rel).unwrap_or(rank);
            debug!(path = %rel, %rank, %winner, "Removal shadowed by higher-ranked source");
            return Ok(Outcome::Shadowed { winner });
        }

        let target = rel.join_onto(&self.destination);

        match next {
            Some(next_rank) => {
                let from = self.sources.resolve(next_rank, rel)?;
                install_file(&from, &target).await?;
                debug!(path = %rel, from = %rank, to = %next_rank, "Fell back to next provider");

                self.emit(OverlayEventKind::Change, &from, rel, &target);
                Ok(Outcome::FellBack { rank: next_rank })
            }
            None => {
                remove_file(&target).await?;
                debug!(path = %rel, %rank, "Removed last provider");

                let source_path = self.sources.resolve(rank, rel)?;
                self.emit(OverlayEventKind::Unlink, &source_path, rel, &target);
                Ok(Outcome::Removed)
            }
        }
    }

    fn emit(&self, kind: OverlayEventKind, source: &Path, rel: &RelativePath, target: &Path) {
        if let Some(observer) = &self.observer {
            observer.on_event(&OverlayEvent::new(kind, source, rel.clone(), target));
        }
    }

    pub(crate) fn report_failure(&self, rel: Option<RelativePath>, source_path: &Path, err: &SyncError) {
        warn!(path = %source_path.display(), error = %err, "Failed to apply change");

        if let Some(observer) = &self.observer {
            observer.on_failure(&SyncFailure {
                relative_path: rel,
                source_path: source_path.to_path_buf(),
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        sources: Vec<TempDir>,
        dest: TempDir,
        reactor: OverlayReactor,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            Self::with_observer(count, None)
        }

        fn with_observer(count: usize, observer: Option<Arc<dyn IOverlayObserver>>) -> Self {
            let sources: Vec<TempDir> = (0..count).map(|_| TempDir::new().unwrap()).collect();
            let dest = TempDir::new().unwrap();
            let set = SourceSet::new(sources.iter().map(|d| d.path().to_path_buf())).unwrap();
            let mut reactor = OverlayReactor::new(Arc::new(set), dest.path().join("merged"));
            if let Some(observer) = observer {
                reactor = reactor.with_observer(observer);
            }
            Self {
                sources,
                dest,
                reactor,
            }
        }

        fn path(&self, rank: usize, rel: &str) -> PathBuf {
            self.sources[rank].path().join(rel)
        }

        fn write(&self, rank: usize, rel: &str, content: &str) -> PathBuf {
            let path = self.path(rank, rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            path
        }

        async fn create(&self, rank: usize, rel: &str) -> Outcome {
            self.reactor
                .handle(&SourceEvent::created(Rank::new(rank), self.path(rank, rel)))
                .await
                .unwrap()
        }

        async fn remove(&self, rank: usize, rel: &str) -> Outcome {
            let path = self.path(rank, rel);
            let _ = std::fs::remove_file(&path);
            self.reactor
                .handle(&SourceEvent::removed(Rank::new(rank), path))
                .await
                .unwrap()
        }

        fn dest_content(&self, rel: &str) -> Option<String> {
            std::fs::read_to_string(self.dest.path().join("merged").join(rel)).ok()
        }
    }

    #[tokio::test]
    async fn test_single_source_create_and_remove() {
        let fx = Fixture::new(1);
        fx.write(0, "a/b.txt", "hello");

        assert_eq!(
            fx.create(0, "a/b.txt").await,
            Outcome::Installed { rank: Rank::new(0) }
        );
        assert_eq!(fx.dest_content("a/b.txt").as_deref(), Some("hello"));

        assert_eq!(fx.remove(0, "a/b.txt").await, Outcome::Removed);
        assert_eq!(fx.dest_content("a/b.txt"), None);
        assert!(fx.reactor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_lower_rank_is_shadowed() {
        let fx = Fixture::new(2);
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");

        fx.create(1, "f.txt").await;
        assert_eq!(
            fx.create(0, "f.txt").await,
            Outcome::Shadowed { winner: Rank::new(1) }
        );
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_higher_rank_takes_over() {
        let fx = Fixture::new(2);
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");

        fx.create(0, "f.txt").await;
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("low"));
        fx.create(1, "f.txt").await;
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_modify_refreshes_winner_only() {
        let fx = Fixture::new(2);
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");
        fx.create(0, "f.txt").await;
        fx.create(1, "f.txt").await;

        fx.write(1, "f.txt", "high v2");
        let outcome = fx
            .reactor
            .handle(&SourceEvent::modified(Rank::new(1), fx.path(1, "f.txt")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Installed { rank: Rank::new(1) });
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("high v2"));

        fx.write(0, "f.txt", "low v2");
        let outcome = fx
            .reactor
            .handle(&SourceEvent::modified(Rank::new(0), fx.path(0, "f.txt")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Shadowed { winner: Rank::new(1) });
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("high v2"));
    }

    #[tokio::test]
    async fn test_fallback_to_next_highest() {
        let fx = Fixture::new(6);
        for rank in [0, 2, 5] {
            fx.write(rank, "p.txt", &format!("from {rank}"));
            fx.create(rank, "p.txt").await;
        }
        assert_eq!(fx.dest_content("p.txt").as_deref(), Some("from 5"));

        assert_eq!(
            fx.remove(5, "p.txt").await,
            Outcome::FellBack { rank: Rank::new(2) }
        );
        assert_eq!(fx.dest_content("p.txt").as_deref(), Some("from 2"));
    }

    #[tokio::test]
    async fn test_removal_of_shadowed_source_leaves_destination() {
        let fx = Fixture::new(2);
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");
        fx.create(0, "f.txt").await;
        fx.create(1, "f.txt").await;

        assert_eq!(
            fx.remove(0, "f.txt").await,
            Outcome::Shadowed { winner: Rank::new(1) }
        );
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("high"));

        assert_eq!(fx.remove(1, "f.txt").await, Outcome::Removed);
        assert_eq!(fx.dest_content("f.txt"), None);
    }

    #[tokio::test]
    async fn test_repeated_remove_is_noop() {
        let fx = Fixture::new(2);
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");
        fx.create(0, "f.txt").await;
        fx.create(1, "f.txt").await;

        assert_eq!(
            fx.remove(1, "f.txt").await,
            Outcome::FellBack { rank: Rank::new(0) }
        );
        assert_eq!(fx.remove(1, "f.txt").await, Outcome::Ignored);
        assert_eq!(fx.dest_content("f.txt").as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_create_for_vanished_file_fails() {
        let fx = Fixture::new(1);
        let err = fx
            .reactor
            .handle(&SourceEvent::created(Rank::new(0), fx.path(0, "ghost.txt")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Vanished(_)));
        assert!(fx.reactor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_event_outside_source_root_fails() {
        let fx = Fixture::new(1);
        let err = fx
            .reactor
            .handle(&SourceEvent::created(Rank::new(0), "/definitely/elsewhere.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DomainError(_)));
    }

    #[tokio::test]
    async fn test_directory_create_and_remove_expand() {
        let fx = Fixture::new(1);
        fx.write(0, "dir/one.txt", "1");
        fx.write(0, "dir/sub/two.txt", "2");

        assert_eq!(fx.create(0, "dir").await, Outcome::Expanded { paths: 2 });
        assert_eq!(fx.dest_content("dir/one.txt").as_deref(), Some("1"));
        assert_eq!(fx.dest_content("dir/sub/two.txt").as_deref(), Some("2"));

        std::fs::remove_dir_all(fx.path(0, "dir")).unwrap();
        let outcome = fx
            .reactor
            .handle(&SourceEvent::removed(Rank::new(0), fx.path(0, "dir")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Expanded { paths: 2 });
        assert_eq!(fx.dest_content("dir/one.txt"), None);
        assert_eq!(fx.dest_content("dir/sub/two.txt"), None);
    }

    #[tokio::test]
    async fn test_directory_modify_ignored() {
        let fx = Fixture::new(1);
        std::fs::create_dir_all(fx.path(0, "dir")).unwrap();

        let outcome = fx
            .reactor
            .handle(&SourceEvent::modified(Rank::new(0), fx.path(0, "dir")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(OverlayEventKind, String)>>,
        failures: Mutex<Vec<SyncFailure>>,
    }

    impl IOverlayObserver for Recorder {
        fn on_event(&self, event: &OverlayEvent) {
            self.events
                .lock()
                .unwrap()
                .push((event.kind, event.data.relative_path.to_string()));
        }

        fn on_failure(&self, failure: &SyncFailure) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    #[tokio::test]
    async fn test_observer_sees_applied_mutations_only() {
        let recorder = Arc::new(Recorder::default());
        let fx = Fixture::with_observer(2, Some(recorder.clone() as Arc<dyn IOverlayObserver>));
        fx.write(0, "f.txt", "low");
        fx.write(1, "f.txt", "high");

        fx.create(1, "f.txt").await;
        fx.create(0, "f.txt").await; // shadowed, not reported
        fx.remove(1, "f.txt").await;
        fx.remove(0, "f.txt").await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (OverlayEventKind::Add, "f.txt".to_string()),
                (OverlayEventKind::Change, "f.txt".to_string()),
                (OverlayEventKind::Unlink, "f.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_or_report_contains_failure() {
        let recorder = Arc::new(Recorder::default());
        let fx = Fixture::with_observer(1, Some(recorder.clone() as Arc<dyn IOverlayObserver>));

        let outcome = fx
            .reactor
            .handle_or_report(&SourceEvent::created(Rank::new(0), fx.path(0, "ghost.txt")))
            .await;
        assert!(outcome.is_none());

        let failures = recorder.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].relative_path,
            Some(RelativePath::new("ghost.txt").unwrap())
        );
        assert!(failures[0].message.contains("vanished"));
    }
}
