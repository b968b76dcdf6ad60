//! collectfs Core - Domain types and configuration
//!
//! This crate holds everything the overlay engine and the command-line front
//! end share:
//! - **Domain types** - `Rank`, `RelativePath`, `Source`, `SourceSet`
//! - **Observer port** - `OverlayEvent` and the `IOverlayObserver` trait used
//!   to report applied mutations and per-path failures
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! The domain module performs no I/O. Filesystem work lives in
//! `collectfs-sync`.

pub mod config;
pub mod domain;
pub mod ports;
