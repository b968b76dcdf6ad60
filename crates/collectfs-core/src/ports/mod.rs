//! Port definitions
//!
//! - [`IOverlayObserver`] - advisory sink for applied overlay mutations and
//!   per-path failures (logging, JSON event streams, IPC)

pub mod observer;

pub use observer::{EventData, IOverlayObserver, OverlayEvent, OverlayEventKind, SyncFailure};
