//! Collection states and item kinds

use serde::{Deserialize, Serialize};

use super::path::RepoPath;

/// What a delta event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
    /// A folder-like bundle the server treats as a single unit
    /// (e.g. a notebook)
    Package,
    /// The synthetic root of a drive
    Root,
}

impl ItemKind {
    /// Folders and packages both materialize as containers
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(self, Self::Folder | Self::Package)
    }
}

/// How a collection relates to the previous backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionState {
    /// No previous path is known for this container
    New,
    /// The container is where it was last time
    NotMoved,
    /// The container exists but its path changed
    Moved,
    /// The container no longer exists; only the previous path remains
    Deleted,
}

/// Collection state as a pure function of the two paths
///
/// The absence of a current path always wins: a tombstone stays a tombstone
/// no matter what the previous path says.
#[must_use]
pub fn state_of(prev: Option<&RepoPath>, full: Option<&RepoPath>) -> CollectionState {
    match (prev, full) {
        (_, None) => CollectionState::Deleted,
        (None, Some(_)) => CollectionState::New,
        (Some(p), Some(f)) if p == f => CollectionState::NotMoved,
        (Some(_), Some(_)) => CollectionState::Moved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::Category;

    fn path(folders: &[&str]) -> RepoPath {
        RepoPath::build("t", "u", Category::Files, folders.to_vec()).unwrap()
    }

    #[test]
    fn state_new_when_no_previous() {
        let full = path(&["drives", "d", "root:", "A"]);
        assert_eq!(state_of(None, Some(&full)), CollectionState::New);
    }

    #[test]
    fn state_not_moved_when_equal() {
        let p = path(&["drives", "d", "root:", "A"]);
        assert_eq!(state_of(Some(&p), Some(&p)), CollectionState::NotMoved);
    }

    #[test]
    fn state_moved_when_different() {
        let prev = path(&["drives", "d", "root:", "A"]);
        let full = path(&["drives", "d", "root:", "B"]);
        assert_eq!(state_of(Some(&prev), Some(&full)), CollectionState::Moved);
    }

    #[test]
    fn state_deleted_when_no_full_path() {
        let prev = path(&["drives", "d", "root:", "A"]);
        assert_eq!(state_of(Some(&prev), None), CollectionState::Deleted);
        assert_eq!(state_of(None, None), CollectionState::Deleted);
    }

    #[test]
    fn kinds() {
        assert!(ItemKind::Folder.is_container());
        assert!(ItemKind::Package.is_container());
        assert!(!ItemKind::File.is_container());
        assert!(!ItemKind::Root.is_container());
    }
}
