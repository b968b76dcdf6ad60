//! Domain types for the overlay view
//!
//! - Newtypes for source ranks and validated relative paths
//! - The ordered source list whose order defines conflict priority
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod source;

pub use errors::DomainError;
pub use newtypes::{Rank, RelativePath};
pub use source::{Source, SourceSet};
