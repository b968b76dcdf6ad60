//! Live overlay orchestration
//!
//! [`OverlaySync`] wires the pieces of the live mode together:
//!
//! 1. create the destination
//! 2. arm a [`SourceWatcher`] on every source (events queue up from here on)
//! 3. seed: feed every pre-existing source file to the reactor as a create
//! 4. hand the queued and future events to the [`EventDispatcher`] until the
//!    shutdown token is cancelled
//!
//! Arming the watchers before the seed means a change that races the scan
//! is seen twice at worst, never missed; the reactor is idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use collectfs_core::config::SyncConfig;
use collectfs_core::domain::SourceSet;
use collectfs_core::ports::IOverlayObserver;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::dispatcher::{DispatchStats, EventDispatcher};
use crate::paths::{check_destination, ensure_dir};
use crate::reactor::{OverlayReactor, Outcome, SourceEvent};
use crate::tree::{enumerate, MergeSummary, TreeMap};
use crate::watcher::SourceWatcher;
use crate::{Result, SyncError};

/// Upper bound on seed events applied concurrently
const SEED_CONCURRENCY: usize = 64;

/// Tuning for the live loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayOptions {
    pub shards: usize,
    pub channel_capacity: usize,
    pub initial_scan: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for OverlayOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            shards: config.shards,
            channel_capacity: config.channel_capacity,
            initial_scan: config.initial_scan,
        }
    }
}

/// Keeps a destination directory in sync with a ranked set of sources
pub struct OverlaySync {
    sources: Arc<SourceSet>,
    destination: PathBuf,
    options: OverlayOptions,
    reactor: Arc<OverlayReactor>,
}

impl OverlaySync {
    pub fn new(sources: SourceSet, destination: impl Into<PathBuf>, options: OverlayOptions) -> Self {
        let sources = Arc::new(sources);
        let destination = destination.into();
        let reactor = Arc::new(OverlayReactor::new(Arc::clone(&sources), destination.clone()));
        Self {
            sources,
            destination,
            options,
            reactor,
        }
    }

    /// Attach an observer; call before [`seed`](Self::seed) or [`run`](Self::run)
    pub fn with_observer(mut self, observer: Arc<dyn IOverlayObserver>) -> Self {
        self.reactor = Arc::new(
            OverlayReactor::new(Arc::clone(&self.sources), self.destination.clone())
                .with_observer(observer),
        );
        self
    }

    pub fn reactor(&self) -> &Arc<OverlayReactor> {
        &self.reactor
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    /// Apply every file currently present in the sources as a create event
    ///
    /// Sources are applied from the highest rank down so lower-ranked
    /// copies of a path are recorded without being copied. Per-file
    /// failures are contained; a file that vanished mid-scan is skipped.
    ///
    /// # Errors
    /// Fails if the destination is inside a source or a source root cannot
    /// be enumerated
    #[instrument(skip_all, fields(destination = %self.destination.display()))]
    pub async fn seed(&self) -> Result<MergeSummary> {
        let started = Instant::now();
        check_destination(&self.sources, &self.destination).await?;
        ensure_dir(&self.destination).await?;

        let mut walks = JoinSet::new();
        for source in self.sources.iter() {
            let root = source.root().to_path_buf();
            let rank = source.rank();
            walks.spawn(async move { (rank, enumerate(&root).await) });
        }

        let mut trees: Vec<(_, TreeMap)> = Vec::with_capacity(self.sources.len());
        while let Some(joined) = walks.join_next().await {
            let (rank, tree) = joined?;
            trees.push((rank, tree?));
        }
        trees.sort_by(|a, b| b.0.cmp(&a.0));

        let mut summary = MergeSummary {
            sources: self.sources.len(),
            files_copied: 0,
            files_shadowed: 0,
            duration_ms: 0,
        };

        for (rank, tree) in trees {
            let mut pending = JoinSet::new();
            for (_, absolute) in tree {
                if pending.len() >= SEED_CONCURRENCY {
                    if let Some(joined) = pending.join_next().await {
                        tally(&mut summary, joined?);
                    }
                }
                let reactor = Arc::clone(&self.reactor);
                let event = SourceEvent::created(rank, absolute);
                pending.spawn(async move { seed_one(&reactor, &event).await });
            }
            while let Some(joined) = pending.join_next().await {
                tally(&mut summary, joined?);
            }
        }

        self.reactor.prune_locks();
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            files_copied = summary.files_copied,
            files_shadowed = summary.files_shadowed,
            duration_ms = summary.duration_ms,
            "Initial scan applied"
        );
        Ok(summary)
    }

    /// Run the live loop until `shutdown` is cancelled
    ///
    /// # Errors
    /// Fails before touching the filesystem if the destination is inside a
    /// source. Also fails if the destination cannot be created, a source
    /// cannot be watched or enumerated, or a worker task panics. Per-event
    /// failures never end the loop.
    #[instrument(skip_all, fields(destination = %self.destination.display(), sources = self.sources.len()))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<DispatchStats> {
        let resolved = check_destination(&self.sources, &self.destination).await?;
        ensure_dir(&self.destination).await?;

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let watcher = SourceWatcher::spawn(&self.sources, Some(&resolved), tx)?;

        if self.options.initial_scan {
            tokio::select! {
                seeded = self.seed() => { seeded?; }
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested during initial scan");
                    return Ok(DispatchStats::default());
                }
            }
        }

        info!(watched = watcher.len(), "Overlay is live");

        let dispatcher = EventDispatcher::new(
            Arc::clone(&self.reactor),
            self.options.shards,
            self.options.channel_capacity,
        );
        let stats = dispatcher.run(rx, shutdown).await?;

        drop(watcher);
        Ok(stats)
    }
}

async fn seed_one(reactor: &OverlayReactor, event: &SourceEvent) -> Option<Outcome> {
    match reactor.handle(event).await {
        Ok(outcome) => Some(outcome),
        Err(SyncError::Vanished(path)) => {
            debug!(path = %path.display(), "Skipping file removed during scan");
            None
        }
        Err(e) => {
            let rel = reactor.relative_path(event).ok();
            reactor.report_failure(rel, &event.path, &e);
            None
        }
    }
}

fn tally(summary: &mut MergeSummary, outcome: Option<Outcome>) {
    match outcome {
        Some(Outcome::Installed { .. }) => summary.files_copied += 1,
        Some(Outcome::Shadowed { .. }) => summary.files_shadowed += 1,
        _ => {}
    }
}
