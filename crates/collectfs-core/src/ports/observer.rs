//! Overlay observer port (driven/secondary port)
//!
//! The overlay engine reports every mutation it applies to the destination,
//! and every per-path failure it swallows, through [`IOverlayObserver`].
//!
//! ## Design Notes
//!
//! - Observers are advisory. The engine never reads anything back from
//!   them and its correctness does not depend on them being present.
//! - Callbacks are synchronous and may be invoked concurrently from
//!   several worker tasks, so implementations must be thread-safe and
//!   should return quickly.
//! - [`OverlayEvent`] serialises to `{"kind": ..., "data": {...}}`, the
//!   shape used for JSON event streams and inter-process notification.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::RelativePath;

// ============================================================================
// OverlayEvent
// ============================================================================

/// Kind of mutation applied to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayEventKind {
    /// A file was installed for a path first seen from the winning source
    Add,
    /// An existing destination file was refreshed or replaced
    Change,
    /// A destination file was deleted
    Unlink,
}

impl fmt::Display for OverlayEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverlayEventKind::Add => "add",
            OverlayEventKind::Change => "change",
            OverlayEventKind::Unlink => "unlink",
        };
        write!(f, "{}", s)
    }
}

/// Paths involved in an applied mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Absolute path of the file in the source that triggered the event
    pub source_path: PathBuf,
    /// Path relative to the source root
    pub relative_path: RelativePath,
    /// Absolute path in the destination
    pub destination_path: PathBuf,
}

/// A mutation that has been applied to the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEvent {
    pub kind: OverlayEventKind,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl OverlayEvent {
    /// Creates an event stamped with the current time
    pub fn new(
        kind: OverlayEventKind,
        source_path: impl Into<PathBuf>,
        relative_path: RelativePath,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            data: EventData {
                source_path: source_path.into(),
                relative_path,
                destination_path: destination_path.into(),
            },
            timestamp: Utc::now(),
        }
    }
}

/// A per-path failure that was contained by the live loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub relative_path: Option<RelativePath>,
    pub source_path: PathBuf,
    pub message: String,
}

// ============================================================================
// IOverlayObserver trait
// ============================================================================

/// Receiver of overlay mutations and contained failures
pub trait IOverlayObserver: Send + Sync {
    /// Called after a mutation has been applied to the destination
    fn on_event(&self, event: &OverlayEvent);

    /// Called when handling an event failed for one path
    fn on_failure(&self, _failure: &SyncFailure) {}
}

impl<F> IOverlayObserver for F
where
    F: Fn(&OverlayEvent) + Send + Sync,
{
    fn on_event(&self, event: &OverlayEvent) {
        self(event)
    }
}
