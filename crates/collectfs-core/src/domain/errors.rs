//! Domain error types
//!
//! Validation failures raised while building ranks, relative paths and
//! source lists.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Absolute path is not located below the given source root
    #[error("Path {path} is not within source root {root}")]
    PathOutsideRoot {
        /// The source root
        root: String,
        /// The offending absolute path
        path: String,
    },

    /// A source list must contain at least one root
    #[error("At least one source directory is required")]
    NoSources,

    /// Rank does not name a registered source
    #[error("Unknown source rank: {0}")]
    UnknownRank(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("../escape".to_string());
        assert_eq!(err.to_string(), "Invalid path: ../escape");

        let err = DomainError::PathOutsideRoot {
            root: "/a".to_string(),
            path: "/b/c".to_string(),
        };
        assert_eq!(err.to_string(), "Path /b/c is not within source root /a");

        assert_eq!(
            DomainError::NoSources.to_string(),
            "At least one source directory is required"
        );
        assert_eq!(
            DomainError::UnknownRank(7).to_string(),
            "Unknown source rank: 7"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(DomainError::UnknownRank(1), DomainError::UnknownRank(1));
        assert_ne!(DomainError::UnknownRank(1), DomainError::UnknownRank(2));
    }
}
