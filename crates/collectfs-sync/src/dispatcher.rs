//! Sharded event dispatcher
//!
//! Live events arrive on a single channel from every source watcher. The
//! [`EventDispatcher`] routes each one to a worker queue chosen by hashing
//! its relative path, so:
//!
//! - events for the same path are handled one at a time, in arrival order
//! - events for different paths proceed concurrently across workers
//!
//! ## Design
//!
//! ```text
//!                        ┌──→ shard 0 ──→ reactor.handle_or_report
//!  mpsc<SourceEvent> ────┼──→ shard 1 ──→ reactor.handle_or_report
//!   (all sources)        └──→ shard N ──→ reactor.handle_or_report
//! ```
//!
//! A failure for one event is logged and reported to the observer by the
//! reactor; the worker moves on to the next event. Cancelling the shutdown
//! token stops intake and every worker promptly. When the input channel
//! closes instead, workers drain what they already hold before exiting.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::reactor::{OverlayReactor, SourceEvent};
use crate::Result;

/// Events routed between sweeps of idle per-path locks
const LOCK_PRUNE_INTERVAL: u64 = 4096;

/// Counters reported when the dispatcher stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events that were applied (including no-op outcomes)
    pub handled: u64,
    /// Events whose handling failed and was contained
    pub failed: u64,
}

impl DispatchStats {
    fn merge(self, other: DispatchStats) -> DispatchStats {
        DispatchStats {
            handled: self.handled + other.handled,
            failed: self.failed + other.failed,
        }
    }
}

/// Routes live events to per-path-serialized workers
pub struct EventDispatcher {
    reactor: Arc<OverlayReactor>,
    shards: usize,
    shard_capacity: usize,
}

impl EventDispatcher {
    /// Create a dispatcher over `shards` workers (at least one)
    pub fn new(reactor: Arc<OverlayReactor>, shards: usize, shard_capacity: usize) -> Self {
        Self {
            reactor,
            shards: shards.max(1),
            shard_capacity: shard_capacity.max(1),
        }
    }

    /// Worker index for an event
    ///
    /// Events whose path cannot be made relative all land on shard 0; the
    /// reactor reports them as failures.
    pub fn shard_for(&self, event: &SourceEvent) -> usize {
        match self.reactor.relative_path(event) {
            Ok(rel) => {
                let mut hasher = DefaultHasher::new();
                rel.hash(&mut hasher);
                (hasher.finish() % self.shards as u64) as usize
            }
            Err(_) => 0,
        }
    }

    /// Consume `events` until the channel closes or `shutdown` is cancelled
    ///
    /// # Errors
    /// Returns an error only if a worker task panicked
    #[instrument(skip_all, fields(shards = self.shards))]
    pub async fn run(
        self,
        mut events: mpsc::Receiver<SourceEvent>,
        shutdown: CancellationToken,
    ) -> Result<DispatchStats> {
        let mut senders = Vec::with_capacity(self.shards);
        let mut workers = JoinSet::new();

        for shard in 0..self.shards {
            let (tx, rx) = mpsc::channel(self.shard_capacity);
            senders.push(tx);
            workers.spawn(run_worker(
                shard,
                Arc::clone(&self.reactor),
                rx,
                shutdown.clone(),
            ));
        }

        info!("Dispatching live events");

        let mut routed: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Dispatcher cancelled");
                    break;
                }
                next = events.recv() => {
                    let Some(event) = next else {
                        debug!("Event channel closed");
                        break;
                    };
                    let shard = self.shard_for(&event);
                    // A closed shard means its worker is already shutting down
                    if senders[shard].send(event).await.is_err() {
                        break;
                    }
                    routed += 1;
                    if routed % LOCK_PRUNE_INTERVAL == 0 {
                        self.reactor.prune_locks();
                    }
                }
            }
        }

        drop(senders);

        let mut stats = DispatchStats::default();
        while let Some(joined) = workers.join_next().await {
            stats = stats.merge(joined?);
        }

        info!(handled = stats.handled, failed = stats.failed, "Dispatcher stopped");
        Ok(stats)
    }
}

async fn run_worker(
    shard: usize,
    reactor: Arc<OverlayReactor>,
    mut queue: mpsc::Receiver<SourceEvent>,
    shutdown: CancellationToken,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };

        match reactor.handle_or_report(&event).await {
            Some(outcome) => {
                debug!(shard, ?outcome, "Event handled");
                stats.handled += 1;
            }
            None => stats.failed += 1,
        }
    }

    if stats.failed > 0 {
        warn!(shard, failed = stats.failed, "Worker finished with contained failures");
    }
    stats
}

#[cfg(test)]
mod tests {
    use collectfs_core::domain::{Rank, SourceSet};
    use tempfile::TempDir;

    use super::*;

    fn reactor_over(sources: &[&TempDir], dest: &TempDir) -> Arc<OverlayReactor> {
        let set = SourceSet::new(sources.iter().map(|d| d.path().to_path_buf())).unwrap();
        Arc::new(OverlayReactor::new(Arc::new(set), dest.path()))
    }

    #[test]
    fn test_same_path_same_shard() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let dispatcher = EventDispatcher::new(reactor_over(&[&a, &b], &dest), 8, 16);

        let from_a = SourceEvent::created(Rank::new(0), a.path().join("x/y.txt"));
        let from_b = SourceEvent::removed(Rank::new(1), b.path().join("x/y.txt"));
        assert_eq!(dispatcher.shard_for(&from_a), dispatcher.shard_for(&from_b));
    }

    #[test]
    fn test_zero_shards_clamped() {
        let a = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let dispatcher = EventDispatcher::new(reactor_over(&[&a], &dest), 0, 0);

        let event = SourceEvent::created(Rank::new(0), a.path().join("f"));
        assert_eq!(dispatcher.shard_for(&event), 0);
    }

    #[tokio::test]
    async fn test_run_drains_closed_channel() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::write(a.path().join("f.txt"), "low").unwrap();
        std::fs::write(b.path().join("f.txt"), "high").unwrap();
        std::fs::write(a.path().join("g.txt"), "only a").unwrap();

        let reactor = reactor_over(&[&a, &b], &dest);
        let dispatcher = EventDispatcher::new(Arc::clone(&reactor), 4, 8);
        let (tx, rx) = mpsc::channel(16);

        tx.send(SourceEvent::created(Rank::new(1), b.path().join("f.txt")))
            .await
            .unwrap();
        tx.send(SourceEvent::created(Rank::new(0), a.path().join("f.txt")))
            .await
            .unwrap();
        tx.send(SourceEvent::created(Rank::new(0), a.path().join("g.txt")))
            .await
            .unwrap();
        tx.send(SourceEvent::created(Rank::new(0), a.path().join("missing.txt")))
            .await
            .unwrap();
        drop(tx);

        let stats = dispatcher.run(rx, CancellationToken::new()).await.unwrap();

        assert_eq!(stats, DispatchStats { handled: 3, failed: 1 });
        assert_eq!(std::fs::read_to_string(dest.path().join("f.txt")).unwrap(), "high");
        assert_eq!(std::fs::read_to_string(dest.path().join("g.txt")).unwrap(), "only a");
    }

    #[tokio::test]
    async fn test_per_path_order_preserved() {
        let a = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::write(a.path().join("f.txt"), "v").unwrap();

        let reactor = reactor_over(&[&a], &dest);
        let dispatcher = EventDispatcher::new(Arc::clone(&reactor), 4, 8);
        let (tx, rx) = mpsc::channel(16);

        // create then remove must end with the file gone
        tx.send(SourceEvent::created(Rank::new(0), a.path().join("f.txt")))
            .await
            .unwrap();
        tx.send(SourceEvent::removed(Rank::new(0), a.path().join("f.txt")))
            .await
            .unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await.unwrap();

        assert!(!dest.path().join("f.txt").exists());
        assert!(reactor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let a = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let dispatcher = EventDispatcher::new(reactor_over(&[&a], &dest), 2, 4);
        let (_tx, rx) = mpsc::channel::<SourceEvent>(4);
        let token = CancellationToken::new();

        let handle = tokio::spawn(dispatcher.run(rx, token.clone()));
        token.cancel();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats, DispatchStats::default());
    }
}
