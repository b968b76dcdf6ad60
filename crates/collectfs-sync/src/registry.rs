//! Priority registry
//!
//! For every relative path, the registry keeps the ascending list of source
//! ranks currently known to provide it. The maximum rank is the winner and
//! is what the destination must show. The registry is the sole source of
//! truth for the destination; the destination is never read back to make
//! decisions.
//!
//! Records live in a [`DashMap`], so operations on distinct paths proceed
//! in parallel (they only contend when they hash to the same shard) and each
//! single operation is atomic. Read-then-act sequences for one path must
//! still be serialised by the caller, see [`PathLocks`].

use std::sync::Arc;

use collectfs_core::domain::{Rank, RelativePath};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

// ============================================================================
// PriorityRecord
// ============================================================================

/// Ranks currently providing one path, sorted ascending, no duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityRecord {
    ranks: Vec<Rank>,
}

impl PriorityRecord {
    /// Insert `rank`; returns false if it was already present
    pub fn insert(&mut self, rank: Rank) -> bool {
        match self.ranks.binary_search(&rank) {
            Ok(_) => false,
            Err(pos) => {
                self.ranks.insert(pos, rank);
                true
            }
        }
    }

    /// Remove `rank`; returns false if it was not present
    pub fn remove(&mut self, rank: Rank) -> bool {
        match self.ranks.binary_search(&rank) {
            Ok(pos) => {
                self.ranks.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, rank: Rank) -> bool {
        self.ranks.binary_search(&rank).is_ok()
    }

    /// Highest rank present
    #[must_use]
    pub fn winner(&self) -> Option<Rank> {
        self.ranks.last().copied()
    }

    /// Highest rank present other than `excluding`
    #[must_use]
    pub fn winner_excluding(&self, excluding: Rank) -> Option<Rank> {
        self.ranks.iter().rev().copied().find(|&r| r != excluding)
    }

    /// Whether some rank strictly greater than `rank` is present
    #[must_use]
    pub fn is_dominated(&self, rank: Rank) -> bool {
        self.winner().is_some_and(|w| w > rank)
    }

    #[must_use]
    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

// ============================================================================
// PriorityRegistry
// ============================================================================

/// Mapping from relative path to [`PriorityRecord`]
///
/// Empty records are pruned, so a path with no providers has no entry.
#[derive(Debug, Default)]
pub struct PriorityRegistry {
    records: DashMap<RelativePath, PriorityRecord>,
}

impl PriorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `rank` provides `path`; idempotent
    ///
    /// Returns true if the rank was newly inserted.
    pub fn record_presence(&self, path: &RelativePath, rank: Rank) -> bool {
        self.records.entry(path.clone()).or_default().insert(rank)
    }

    /// Note that `rank` no longer provides `path`; no-op if it did not
    ///
    /// Returns true if the rank was present.
    pub fn record_absence(&self, path: &RelativePath, rank: Rank) -> bool {
        let removed = match self.records.get_mut(path) {
            Some(mut record) => record.remove(rank),
            None => return false,
        };
        self.records.remove_if(path, |_, record| record.is_empty());
        removed
    }

    /// Highest rank currently providing `path`
    pub fn winner(&self, path: &RelativePath) -> Option<Rank> {
        self.records.get(path).and_then(|r| r.winner())
    }

    /// Whether a rank strictly higher than `rank` currently provides `path`
    pub fn is_dominated(&self, path: &RelativePath, rank: Rank) -> bool {
        self.records
            .get(path)
            .is_some_and(|r| r.is_dominated(rank))
    }

    /// The winner `path` would have once `excluding` is removed
    ///
    /// Does not modify the record.
    pub fn fallback(&self, path: &RelativePath, excluding: Rank) -> Option<Rank> {
        self.records
            .get(path)
            .and_then(|r| r.winner_excluding(excluding))
    }

    /// Whether `rank` currently provides `path`
    pub fn provides(&self, path: &RelativePath, rank: Rank) -> bool {
        self.records.get(path).is_some_and(|r| r.contains(rank))
    }

    /// Paths strictly below `dir` that `rank` currently provides
    pub fn provided_below(&self, dir: &RelativePath, rank: Rank) -> Vec<RelativePath> {
        let mut paths: Vec<RelativePath> = self
            .records
            .iter()
            .filter(|entry| {
                entry.key() != dir && entry.key().starts_with(dir) && entry.value().contains(rank)
            })
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        paths
    }

    /// Copy of the record for `path`
    pub fn record(&self, path: &RelativePath) -> Option<PriorityRecord> {
        self.records.get(path).map(|r| r.clone())
    }

    /// Number of paths with at least one provider
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// PathLocks
// ============================================================================

/// Per-path async mutexes
///
/// Holding the guard for a path across the registry update and the file
/// I/O that follows it keeps two events for the same path from
/// interleaving, while other paths remain unaffected.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<RelativePath, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &RelativePath) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop mutexes nobody is holding or waiting on
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
