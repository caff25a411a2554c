//! Details ledger
//!
//! The per-snapshot record of every item and folder backed up: repo ref,
//! short-ref, logical location, and descriptive info. Built under a mutex
//! while collections stream concurrently, then frozen.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use graphvault_core::domain::{EngineError, PathBuilder, RepoPath};
use graphvault_core::ports::store::{InfoKind, ItemInfo};
use serde::{Deserialize, Serialize};

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsEntry {
    /// Full storage path of the item
    pub repo_ref: String,
    /// Stable hash of `repo_ref`; the merge key
    pub short_ref: String,
    /// Short-ref of the parent folder
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_ref: String,
    /// Logical path by display names, without the repo prefix
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location_ref: String,
    /// Whether this backup added or changed the item
    pub updated: bool,
    pub info: ItemInfo,
}

/// A frozen ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsLedger {
    pub entries: Vec<DetailsEntry>,
}

impl DetailsLedger {
    #[must_use]
    pub fn find_by_repo_ref(&self, repo_ref: &str) -> Option<&DetailsEntry> {
        self.entries.iter().find(|e| e.repo_ref == repo_ref)
    }

    /// Rows that describe items rather than folders or sidecars
    #[must_use]
    pub fn items(&self) -> impl Iterator<Item = &DetailsEntry> {
        self.entries
            .iter()
            .filter(|e| e.info.kind != InfoKind::Folder && !e.info.is_meta)
    }
}

#[derive(Debug, Clone)]
struct FolderEntry {
    repo_ref: String,
    short_ref: String,
    parent_ref: String,
    location_ref: String,
    display_name: String,
    size: i64,
    modified: DateTime<Utc>,
    updated: bool,
}

#[derive(Default)]
struct BuilderState {
    entries: Vec<DetailsEntry>,
    known_folders: BTreeMap<String, FolderEntry>,
}

/// Concurrent ledger builder
///
/// `add_item` both records the item and upserts every ancestor folder
/// entry: a folder's modified time is the max of its children's, its size
/// the sum, and its updated flag the OR.
#[derive(Default)]
pub struct DetailsBuilder {
    state: Mutex<BuilderState>,
}

impl DetailsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one item and roll its stats up through its ancestors
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` when `repo_path` is not an item
    /// path
    pub fn add_item(
        &self,
        repo_path: &RepoPath,
        location: Option<&PathBuilder>,
        updated: bool,
        info: ItemInfo,
    ) -> Result<(), EngineError> {
        if repo_path.item().is_none() {
            return Err(EngineError::InvalidPath(format!(
                "details entry {repo_path} is not an item path"
            )));
        }

        let folders = folder_chain(repo_path, location)?;
        let parent_ref = folders
            .first()
            .map(|f| f.short_ref.clone())
            .unwrap_or_default();

        let entry = DetailsEntry {
            repo_ref: repo_path.to_string(),
            short_ref: repo_path.short_ref(),
            parent_ref,
            location_ref: location.map(|l| l.to_string()).unwrap_or_default(),
            updated,
            info: info.clone(),
        };

        let mut state = self.state.lock().expect("details builder poisoned");
        state.entries.push(entry);

        for folder in folders {
            let slot = state
                .known_folders
                .entry(folder.short_ref.clone())
                .or_insert(folder);

            slot.size += info.size;
            if info.modified > slot.modified {
                slot.modified = info.modified;
            }
            if updated {
                slot.updated = true;
            }
        }

        Ok(())
    }

    /// Freeze the ledger, appending the accumulated folder rows
    #[must_use]
    pub fn build(self) -> DetailsLedger {
        let state = self.state.into_inner().expect("details builder poisoned");
        let mut entries = state.entries;

        for folder in state.known_folders.into_values() {
            entries.push(DetailsEntry {
                repo_ref: folder.repo_ref,
                short_ref: folder.short_ref,
                parent_ref: folder.parent_ref,
                location_ref: folder.location_ref,
                updated: folder.updated,
                info: ItemInfo {
                    kind: InfoKind::Folder,
                    name: folder.display_name,
                    drive_name: None,
                    parent_path: String::new(),
                    size: folder.size,
                    created: None,
                    modified: folder.modified,
                    is_meta: false,
                },
            });
        }

        DetailsLedger { entries }
    }
}

/// Ancestor folder skeletons for an item path, nearest first, stopping at
/// the category root
fn folder_chain(
    item_path: &RepoPath,
    location: Option<&PathBuilder>,
) -> Result<Vec<FolderEntry>, EngineError> {
    let mut chain = Vec::new();

    let mut folders = item_path.folders().to_vec();
    let mut loc = location.cloned();

    while !folders.is_empty() {
        let folder_path = RepoPath::build(
            item_path.tenant(),
            item_path.owner(),
            item_path.category(),
            folders.clone(),
        )?;

        let parent_folders = &folders[..folders.len() - 1];
        let parent_ref = if parent_folders.is_empty() {
            String::new()
        } else {
            RepoPath::build(
                item_path.tenant(),
                item_path.owner(),
                item_path.category(),
                parent_folders.to_vec(),
            )?
            .short_ref()
        };

        let display_name = loc
            .as_ref()
            .and_then(|l| l.last_elem().map(String::from))
            .unwrap_or_else(|| folders.last().cloned().unwrap_or_default());

        chain.push(FolderEntry {
            repo_ref: folder_path.to_string(),
            short_ref: folder_path.short_ref(),
            parent_ref,
            location_ref: loc.as_ref().map(|l| l.to_string()).unwrap_or_default(),
            display_name,
            size: 0,
            modified: DateTime::<Utc>::MIN_UTC,
            updated: false,
        });

        folders.pop();
        loc = loc.map(|l| l.dir());
    }

    Ok(chain)
}
