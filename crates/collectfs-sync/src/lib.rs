//! collectfs Sync - Overlay synchronization engine
//!
//! Presents N ordered source trees as one merged destination directory.
//! When several sources provide the same relative path, the source with the
//! highest rank (latest in the list) wins.
//!
//! ## Modules
//!
//! - [`paths`] - relative-path computation and idempotent directory creation
//! - [`tree`] - one-shot concurrent enumeration and the one-shot merge
//! - [`registry`] - per-path priority bookkeeping (the source of truth)
//! - [`reactor`] - applies create/modify/remove events to the destination
//! - [`dispatcher`] - shards live events by path across worker queues
//! - [`watcher`] - notify-based change notifier for each source tree
//! - [`lifecycle`] - destination teardown and termination signals
//! - [`overlay`] - wires watchers, dispatcher and reactor into a live loop
//!
//! ## Architecture
//!
//! ```text
//!  source 0 ─┐
//!  source 1 ─┼─ SourceWatcher ──→ mpsc ──→ EventDispatcher ──→ shard workers
//!  source N ─┘                                                    │
//!                                                      OverlayReactor
//!                                                       │        │
//!                                            PriorityRegistry   destination
//! ```

pub mod dispatcher;
pub mod lifecycle;
pub mod overlay;
pub mod paths;
pub mod reactor;
pub mod registry;
pub mod tree;
pub mod watcher;

use std::path::PathBuf;

use collectfs_core::domain::DomainError;
use thiserror::Error;

/// Errors that can occur during overlay operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A source root could not be walked
    #[error("Failed to enumerate {root}: {source}")]
    Enumeration {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be installed in the destination
    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A destination file could not be deleted
    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination is one of the sources or lies inside one
    #[error("Destination {destination} is inside source {source_root}")]
    NestedDestination {
        destination: PathBuf,
        source_root: PathBuf,
    },

    /// The source file disappeared between notification and handling
    #[error("Source file vanished: {0}")]
    Vanished(PathBuf),

    /// The filesystem notifier failed
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A domain-level error propagated from collectfs-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}

/// Result alias for overlay operations
pub type Result<T> = std::result::Result<T, SyncError>;
