//! Store port (driving side)
//!
//! What the content-addressed snapshot store sees: collections of lazily
//! readable items, each annotated with the bookkeeping it needs to decide
//! between re-hashing and grafting.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::domain::{CollectionState, EngineError, PathBuilder, RepoPath};
use crate::fault::FaultBus;

// ============================================================================
// Item info
// ============================================================================

/// Fine-grained type of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InfoKind {
    Mail,
    Contact,
    Event,
    DriveFile,
    ListItem,
    Folder,
}

/// Descriptive metadata carried next to an item's bytes
///
/// Stored in the details ledger and rewritten by the merger when an
/// untouched item moves with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    pub kind: InfoKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_name: Option<String>,
    /// Logical parent path by display names, without the repo prefix
    pub parent_path: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
    /// True for sidecar metadata blobs (permissions documents)
    #[serde(default)]
    pub is_meta: bool,
}

impl ItemInfo {
    /// Point the info at a new location after a parent move
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` if the new path is not anchored
    /// to a drive for drive-based entries
    pub fn update_parent_path(&mut self, new_repo_path: &RepoPath) -> Result<(), EngineError> {
        self.parent_path = if new_repo_path.category().is_drive_based() {
            new_repo_path.drive_folder_path()?
        } else {
            new_repo_path.folder_path()
        };
        Ok(())
    }
}

// ============================================================================
// Lazy data
// ============================================================================

/// Future yielding an item's bytes
pub type DataFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, EngineError>> + Send>>;

/// A deferred download
///
/// The bytes are not pulled until the store calls [`LazyData::read`];
/// collections hand these out so that unchanged items grafted from a prior
/// base never touch the network.
pub struct LazyData(Box<dyn FnOnce() -> DataFuture + Send>);

impl LazyData {
    pub fn new<F>(thunk: F) -> Self
    where
        F: FnOnce() -> DataFuture + Send + 'static,
    {
        Self(Box::new(thunk))
    }

    /// Data already in memory (metadata payloads, codec files)
    #[must_use]
    pub fn ready(bytes: Vec<u8>) -> Self {
        Self(Box::new(move || Box::pin(async move { Ok(bytes) })))
    }

    /// Resolve the thunk and produce the bytes
    ///
    /// # Errors
    /// Propagates whatever the deferred download returns
    pub async fn read(self) -> Result<Vec<u8>, EngineError> {
        (self.0)().await
    }
}

impl fmt::Debug for LazyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyData(..)")
    }
}

/// One streamed item
#[derive(Debug)]
pub struct BackupItem {
    /// Storage name within the collection, including any kind suffix
    pub id: String,
    pub deleted: bool,
    pub modified: Option<DateTime<Utc>>,
    /// Absent for pure tombstone markers
    pub info: Option<ItemInfo>,
    pub data: LazyData,
}

// ============================================================================
// Collections
// ============================================================================

/// The unit of persistence handed to the store
pub trait BackupCollection: Send + Sync {
    /// Current path; `None` for tombstones
    fn full_path(&self) -> Option<&RepoPath>;

    /// Path in the previous backup; `None` for brand-new containers
    fn previous_path(&self) -> Option<&RepoPath>;

    fn state(&self) -> CollectionState;

    /// True when the enumeration was rebuilt after a token reset and the
    /// store must not graft prior items into this collection
    fn do_not_merge_items(&self) -> bool;

    /// Stream the collection's items. Item population starts lazily when
    /// this is first called; per-item failures land on the bus.
    fn items(&self, cancel: CancelToken, bus: Arc<FaultBus>) -> mpsc::Receiver<BackupItem>;
}

// ============================================================================
// Prior-base references
// ============================================================================

/// Back-pointer the store provides for each mergeable prior item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevRef {
    /// Where the item's entry lives in the prior base
    pub previous_repo_path: RepoPath,
    /// Prior logical location by display names, when known
    pub previous_location_path: Option<PathBuilder>,
}

/// Prior references keyed by the short-ref of the previous repo path
pub type PrevRefs = HashMap<String, PrevRef>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    #[tokio::test]
    async fn lazy_data_ready_round_trips() {
        let data = LazyData::ready(b"payload".to_vec());
        assert_eq!(data.read().await.unwrap(), b"payload".to_vec());
    }

    #[tokio::test]
    async fn lazy_data_defers_the_thunk() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let touched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&touched);

        let data = LazyData::new(move || {
            flag.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(vec![1, 2, 3]) })
        });

        assert!(!touched.load(Ordering::SeqCst));
        assert_eq!(data.read().await.unwrap(), vec![1, 2, 3]);
        assert!(touched.load(Ordering::SeqCst));
    }

    #[test]
    fn item_info_parent_path_rewrite() {
        let mut info = ItemInfo {
            kind: InfoKind::DriveFile,
            name: "report.pdf".into(),
            drive_name: Some("OneDrive".into()),
            parent_path: "Old/Place".into(),
            size: 10,
            created: None,
            modified: Utc::now(),
            is_meta: false,
        };

        let repo = RepoPath::build(
            "t",
            "u",
            Category::Files,
            ["drives", "d", "root:", "New", "Place"],
        )
        .unwrap();

        info.update_parent_path(&repo).unwrap();
        assert_eq!(info.parent_path, "New/Place");
    }
}
