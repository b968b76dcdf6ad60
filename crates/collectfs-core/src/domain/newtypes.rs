//! Domain newtypes with validation
//!
//! [`Rank`] is the fixed priority of a source. [`RelativePath`] is the join
//! key shared by every source tree and the destination.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Rank
// ============================================================================

/// Priority of a source, equal to its position in the source list
///
/// Higher ranks win conflicts. A rank never changes for the lifetime of
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(usize);

impl Rank {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the source in the caller-supplied list
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Rank {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

// ============================================================================
// RelativePath
// ============================================================================

/// A file path relative to a source root
///
/// RelativePath ensures the path is:
/// - Non-empty
/// - Relative (no root or prefix component)
/// - Free of `..` components, so joining it onto a root never escapes it
///
/// `.` components are dropped during construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct RelativePath(PathBuf);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is empty, absolute, or
    /// contains a parent (`..`) component
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let path = path.into();
        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(DomainError::InvalidPath(format!(
                        "Relative path must not contain '..': {}",
                        path.display()
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path must be relative: {}",
                        path.display()
                    )));
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(DomainError::InvalidPath(format!(
                "Relative path is empty: {}",
                path.display()
            )));
        }

        Ok(Self(normalized))
    }

    /// Compute the path of `absolute` relative to `root`
    ///
    /// # Errors
    /// Returns `DomainError::PathOutsideRoot` if `absolute` is not below
    /// `root`, or `DomainError::InvalidPath` if it is the root itself
    pub fn from_root(root: &Path, absolute: &Path) -> Result<Self, DomainError> {
        let stripped = absolute
            .strip_prefix(root)
            .map_err(|_| DomainError::PathOutsideRoot {
                root: root.display().to_string(),
                path: absolute.display().to_string(),
            })?;
        Self::new(stripped)
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Resolve this path below `root`
    #[must_use]
    pub fn join_onto(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }

    /// Whether this path equals `prefix` or lies below it
    #[must_use]
    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for RelativePath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<RelativePath> for PathBuf {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

impl AsRef<Path> for RelativePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(Rank::new(2) > Rank::new(1));
        assert_eq!(Rank::from(3).index(), 3);
        assert_eq!(Rank::new(5).to_string(), "5");
    }

    #[test]
    fn test_relative_path_valid() {
        let path = RelativePath::new("notes/todo.txt").unwrap();
        assert_eq!(path.as_path(), Path::new("notes/todo.txt"));
        assert_eq!(path.to_string(), "notes/todo.txt");
    }

    #[test]
    fn test_relative_path_drops_cur_dir() {
        let path = RelativePath::new("./notes/./todo.txt").unwrap();
        assert_eq!(path.as_path(), Path::new("notes/todo.txt"));
    }

    #[test]
    fn test_relative_path_rejects_absolute() {
        let err = RelativePath::new("/etc/passwd").unwrap_err();
        assert!(matches!(err, DomainError::InvalidPath(_)));
    }

    #[test]
    fn test_relative_path_rejects_parent() {
        assert!(RelativePath::new("a/../../b").is_err());
    }

    #[test]
    fn test_relative_path_rejects_empty() {
        assert!(RelativePath::new("").is_err());
        assert!(RelativePath::new(".").is_err());
    }

    #[test]
    fn test_from_root() {
        let rel = RelativePath::from_root(Path::new("/src/a"), Path::new("/src/a/x/y.txt"))
            .unwrap();
        assert_eq!(rel.as_path(), Path::new("x/y.txt"));
    }

    #[test]
    fn test_from_root_outside() {
        let err =
            RelativePath::from_root(Path::new("/src/a"), Path::new("/src/b/y.txt")).unwrap_err();
        assert!(matches!(err, DomainError::PathOutsideRoot { .. }));
    }

    #[test]
    fn test_from_root_is_root() {
        assert!(RelativePath::from_root(Path::new("/src/a"), Path::new("/src/a")).is_err());
    }

    #[test]
    fn test_join_onto_and_starts_with() {
        let rel = RelativePath::new("dir/file.txt").unwrap();
        assert_eq!(
            rel.join_onto(Path::new("/dest")),
            PathBuf::from("/dest/dir/file.txt")
        );

        let dir = RelativePath::new("dir").unwrap();
        let other = RelativePath::new("dirt/file.txt").unwrap();
        assert!(rel.starts_with(&dir));
        assert!(!other.starts_with(&dir));
    }

    #[test]
    fn test_relative_path_serde() {
        let rel = RelativePath::new("a/b.txt").unwrap();
        let json = serde_json::to_string(&rel).unwrap();
        assert_eq!(json, "\"a/b.txt\"");

        let back: RelativePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rel);

        let bad: Result<RelativePath, _> = serde_json::from_str("\"/abs\"");
        assert!(bad.is_err());
    }
}
