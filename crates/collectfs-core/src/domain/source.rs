//! Ordered source list
//!
//! The order in which sources are registered *is* the priority order: the
//! source at index `n` has [`Rank`] `n` and beats every lower rank.

use std::path::{Path, PathBuf};

use super::errors::DomainError;
use super::newtypes::{Rank, RelativePath};

/// A single source tree and its fixed rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    rank: Rank,
    root: PathBuf,
}

impl Source {
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path` inside this source
    #[must_use]
    pub fn resolve(&self, path: &RelativePath) -> PathBuf {
        path.join_onto(&self.root)
    }

    /// Relative path of an absolute path reported for this source
    ///
    /// # Errors
    /// Returns an error if `absolute` is not below the source root
    pub fn relativize(&self, absolute: &Path) -> Result<RelativePath, DomainError> {
        RelativePath::from_root(&self.root, absolute)
    }
}

/// Immutable, ordered list of sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    sources: Vec<Source>,
}

impl SourceSet {
    /// Build a source set; the iteration order assigns ranks
    ///
    /// # Errors
    /// Returns `DomainError::NoSources` if `roots` is empty
    pub fn new<I, P>(roots: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let sources: Vec<Source> = roots
            .into_iter()
            .enumerate()
            .map(|(index, root)| Source {
                rank: Rank::new(index),
                root: root.into(),
            })
            .collect();

        if sources.is_empty() {
            return Err(DomainError::NoSources);
        }

        Ok(Self { sources })
    }

    /// # Errors
    /// Returns `DomainError::UnknownRank` if no source has this rank
    pub fn get(&self, rank: Rank) -> Result<&Source, DomainError> {
        self.sources
            .get(rank.index())
            .ok_or(DomainError::UnknownRank(rank.index()))
    }

    /// Sources in ascending rank order
    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Absolute location of `path` inside the source with `rank`
    ///
    /// # Errors
    /// Returns `DomainError::UnknownRank` if no source has this rank
    pub fn resolve(&self, rank: Rank, path: &RelativePath) -> Result<PathBuf, DomainError> {
        Ok(self.get(rank)?.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_follow_order() {
        let set = SourceSet::new(["/a", "/b", "/c"]).unwrap();
        let ranks: Vec<usize> = set.iter().map(|s| s.rank().index()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(set.get(Rank::new(1)).unwrap().root(), Path::new("/b"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_empty_rejected() {
        let roots: Vec<PathBuf> = Vec::new();
        assert_eq!(SourceSet::new(roots).unwrap_err(), DomainError::NoSources);
    }

    #[test]
    fn test_unknown_rank() {
        let set = SourceSet::new(["/a"]).unwrap();
        assert_eq!(
            set.get(Rank::new(4)).unwrap_err(),
            DomainError::UnknownRank(4)
        );
    }

    #[test]
    fn test_resolve_and_relativize() {
        let set = SourceSet::new(["/a", "/b"]).unwrap();
        let rel = RelativePath::new("notes/todo.txt").unwrap();
        assert_eq!(
            set.resolve(Rank::new(1), &rel).unwrap(),
            PathBuf::from("/b/notes/todo.txt")
        );

        let source = set.get(Rank::new(0)).unwrap();
        assert_eq!(
            source.relativize(Path::new("/a/notes/todo.txt")).unwrap(),
            rel
        );
        assert!(source.relativize(Path::new("/b/notes/todo.txt")).is_err());
    }
}
