//! Tree reconciliation
//!
//! Ingests one drive's stream of item events and maintains the three live
//! structures of an enumeration: the collection map (container id to
//! collection), the new-paths map (container id to current repo path), and
//! the exclusion set the store uses to suppress superseded blobs.
//!
//! The server guarantees folders arrive before their children within a
//! page, and pages arrive in order; everything here leans on that. Moved
//! folders do not re-emit their descendants, so a folder move ripples a
//! prefix substitution through both the new-paths map and the collection
//! map.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use graphvault_core::control::Options;
use graphvault_core::domain::path::replace_path_prefix;
use graphvault_core::domain::{Category, DriveId, EngineError, ItemKind, RepoPath};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::selector::FolderMatcher;
use graphvault_core::ports::BackupCollection;
use graphvault_core::ports::transport::{DriveClient, DriveItem};
use tracing::debug;

use crate::collection::{DriveCollection, DATA_FILE_SUFFIX, META_FILE_SUFFIX};

/// Library folder the server reserves for site page content; never backed up
const RESTRICTED_DIRECTORY: &str = "Site Pages";

/// Counters accumulated while reconciling one drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub items: u64,
    pub files: u64,
    pub containers: u64,
}

/// Everything a finished reconciliation hands back
pub struct ReconcileResults {
    /// Collections keyed by container id (tombstones included)
    pub collections: HashMap<String, DriveCollection>,
    /// Container id -> current repo path string
    pub new_paths: BTreeMap<String, String>,
    /// Blob names superseded by this enumeration
    pub excluded: BTreeSet<String>,
    pub counts: ReconcileCounts,
}

/// Stateful tree updater for one drive enumeration
///
/// Single-writer: one reconciler per (owner, category, drive), fed pages
/// in order. A delta reset discards the instance; the enumerator builds a
/// fresh one with `invalid_prev_delta` set.
pub struct Reconciler {
    tenant: String,
    owner: String,
    category: Category,
    drive_id: DriveId,
    drive_name: String,
    transport: Arc<dyn DriveClient>,
    matcher: Arc<dyn FolderMatcher>,
    options: Options,
    invalid_prev_delta: bool,

    collections: HashMap<String, DriveCollection>,
    new_paths: BTreeMap<String, String>,
    excluded: BTreeSet<String>,
    /// File id -> container id it was last seen in during this run;
    /// catches multi-move of a file within one delta window
    item_container: HashMap<String, String>,
    counts: ReconcileCounts,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        category: Category,
        drive_id: DriveId,
        drive_name: impl Into<String>,
        transport: Arc<dyn DriveClient>,
        matcher: Arc<dyn FolderMatcher>,
        options: Options,
        initial_paths: BTreeMap<String, String>,
        invalid_prev_delta: bool,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            owner: owner.into(),
            category,
            drive_id,
            drive_name: drive_name.into(),
            transport,
            matcher,
            options,
            invalid_prev_delta,
            collections: HashMap::new(),
            new_paths: initial_paths,
            excluded: BTreeSet::new(),
            item_container: HashMap::new(),
            counts: ReconcileCounts::default(),
        }
    }

    /// The canonical repo path for this drive's root
    ///
    /// # Errors
    /// Propagates path construction failures
    pub fn root_path(&self) -> Result<RepoPath, EngineError> {
        RepoPath::build(
            &self.tenant,
            &self.owner,
            self.category,
            ["drives", self.drive_id.as_str(), "root:"],
        )
    }

    /// Anchor a raw server-side path (`/drives/<id>/root:/A/B`) to the
    /// tenant/owner prefix
    ///
    /// # Errors
    /// Propagates path construction failures
    fn canonical_path(&self, raw: &str) -> Result<RepoPath, EngineError> {
        RepoPath::build(
            &self.tenant,
            &self.owner,
            self.category,
            raw.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>(),
        )
    }

    /// Apply one page of item events, in order
    ///
    /// Malformed events are recorded on the bus and skipped; an internal
    /// invariant violation aborts with `EngineError::Consistency`.
    ///
    /// # Errors
    /// Returns `EngineError::Consistency` when the engine's own state is
    /// contradicted (e.g. a moved file's previous collection is missing)
    pub fn apply_page(
        &mut self,
        items: Vec<DriveItem>,
        old_paths: &BTreeMap<String, String>,
        bus: &Arc<FaultBus>,
    ) -> Result<(), EngineError> {
        for item in items {
            self.apply_event(item, old_paths, bus)?;
        }
        Ok(())
    }

    fn apply_event(
        &mut self,
        item: DriveItem,
        old_paths: &BTreeMap<String, String>,
        bus: &Arc<FaultBus>,
    ) -> Result<(), EngineError> {
        let id = item.id.as_str().to_string();

        if item.kind == ItemKind::Root {
            // The root never forms a collection, but its path entry seeds
            // parent resolution for the next incremental run.
            let root = self.root_path()?;
            Self::update_path(&mut self.new_paths, &id, root.to_string());
            return Ok(());
        }

        // Parent validation: every non-root event needs a parent id, and
        // live events need the parent's path as well.
        let parent_id = match item.parent.as_ref().and_then(|p| p.id.as_ref()) {
            Some(pid) => pid.as_str().to_string(),
            None => {
                bus.add_recoverable(EngineError::Validation(format!(
                    "item {id} ({}) has no parent reference",
                    item.name
                )));
                return Ok(());
            }
        };

        let parent_raw_path = item.parent.as_ref().and_then(|p| p.path.clone());

        let collection_path = if item.deleted {
            match old_paths.get(&parent_id) {
                Some(persisted) => match RepoPath::from_data_layer(persisted, false) {
                    Ok(p) => p,
                    Err(err) => {
                        bus.add_recoverable(err);
                        return Ok(());
                    }
                },
                // Created and destroyed between two runs; nothing to undo.
                None => return Ok(()),
            }
        } else {
            let Some(raw) = parent_raw_path else {
                bus.add_recoverable(EngineError::Validation(format!(
                    "live item {id} ({}) has no parent path",
                    item.name
                )));
                return Ok(());
            };
            self.canonical_path(&raw)?
        };

        let is_container = item.kind.is_container();

        let item_path = if item.deleted {
            None
        } else {
            if item.name.is_empty() {
                bus.add_recoverable(EngineError::Validation(format!(
                    "non-deleted item {id} has an empty name"
                )));
                return Ok(());
            }
            Some(collection_path.append(&item.name, !is_container)?)
        };

        if self.should_skip_drive(item_path.as_ref())
            && self.should_skip_drive(Some(&collection_path))
        {
            debug!(path = %collection_path, "skipping out-of-scope path");
            return Ok(());
        }

        if is_container {
            self.apply_container_event(&id, item, item_path, old_paths, bus)
        } else {
            self.apply_file_event(&id, item, parent_id, collection_path, old_paths, bus)
        }
    }

    fn apply_container_event(
        &mut self,
        id: &str,
        item: DriveItem,
        item_path: Option<RepoPath>,
        old_paths: &BTreeMap<String, String>,
        bus: &Arc<FaultBus>,
    ) -> Result<(), EngineError> {
        let prev_path = match old_paths.get(id) {
            Some(persisted) => match RepoPath::from_data_layer(persisted, false) {
                Ok(p) => Some(p),
                Err(err) => {
                    bus.add_recoverable(err);
                    None
                }
            },
            None => None,
        };

        if item.deleted {
            // Descendants produce their own delete events, so no prefix
            // sweep is needed here; the enumerator still prunes survivors
            // defensively before persisting.
            self.new_paths.remove(id);

            let Some(prev) = prev_path else {
                // Created and deleted within one delta window.
                return Ok(());
            };

            let tombstone = DriveCollection::new(
                Arc::clone(&self.transport),
                None,
                Some(prev),
                self.drive_id.clone(),
                self.drive_name.clone(),
                self.category,
                self.options.clone(),
                self.invalid_prev_delta,
            );
            self.collections.insert(id.to_string(), tombstone);
            return Ok(());
        }

        let item_path = item_path.expect("live container events carry a path");

        // Move propagation first: every descendant entry is rewritten by
        // prefix substitution before anything else sees the map.
        Self::update_path(&mut self.new_paths, id, item_path.to_string());

        let found = self.update_collection_paths(id, &item_path);

        if !found {
            let collection = DriveCollection::new(
                Arc::clone(&self.transport),
                Some(item_path),
                prev_path,
                self.drive_id.clone(),
                self.drive_name.clone(),
                self.category,
                self.options.clone(),
                self.invalid_prev_delta,
            );
            self.collections.insert(id.to_string(), collection);
            self.counts.containers += 1;
        }

        // Personal drives carry folder metadata (permissions) as items of
        // their own collection.
        if self.category == Category::Files {
            if let Some(collection) = self.collections.get_mut(id) {
                if collection.add(item) {
                    self.counts.items += 1;
                }
            }
        }

        Ok(())
    }

    fn apply_file_event(
        &mut self,
        id: &str,
        item: DriveItem,
        parent_id: String,
        collection_path: RepoPath,
        old_paths: &BTreeMap<String, String>,
        _bus: &Arc<FaultBus>,
    ) -> Result<(), EngineError> {
        // Changed or deleted either way: the prior blobs must not survive
        // the graft. Skipped entirely on a rebuilt enumeration, where no
        // grafting happens.
        if !self.invalid_prev_delta {
            self.excluded.insert(format!("{id}{DATA_FILE_SUFFIX}"));
            self.excluded.insert(format!("{id}{META_FILE_SUFFIX}"));
        }

        if item.deleted {
            // Deletions stream nothing; the exclusion set covers the graft
            // side. Counted to keep parity with what the server reported.
            self.counts.files += 1;
            self.counts.items += 1;
            return Ok(());
        }

        // The root's path can never change; everything else consults the
        // previous run's map.
        let at_root = collection_path
            .drive_folder_path()
            .map(|f| f.is_empty())
            .unwrap_or(false);

        let prev_collection_path = if at_root {
            Some(collection_path.clone())
        } else {
            old_paths
                .get(&parent_id)
                .and_then(|persisted| RepoPath::from_data_layer(persisted, false).ok())
        };

        if !self.collections.contains_key(&parent_id) {
            // Rare: the server emitted a file before its folder. Synthesize
            // the collection with the best-known paths.
            let collection = DriveCollection::new(
                Arc::clone(&self.transport),
                Some(collection_path),
                prev_collection_path,
                self.drive_id.clone(),
                self.drive_name.clone(),
                self.category,
                self.options.clone(),
                self.invalid_prev_delta,
            );
            self.collections.insert(parent_id.clone(), collection);
            self.counts.containers += 1;
        }

        // A file moved more than once within this delta window is still
        // registered under its earlier container; pull it out before
        // inserting anew.
        if let Some(old_container) = self.item_container.get(id).cloned() {
            if old_container != parent_id {
                let Some(previous) = self.collections.get_mut(&old_container) else {
                    return Err(EngineError::Consistency(format!(
                        "previous collection {old_container} not found for moved item {id}"
                    )));
                };

                if !previous.remove(&item.id) {
                    return Err(EngineError::Consistency(format!(
                        "moved item {id} missing from its previous collection"
                    )));
                }
            }
        }

        self.item_container.insert(id.to_string(), parent_id.clone());

        let collection = self
            .collections
            .get_mut(&parent_id)
            .expect("ensured above");

        if collection.add(item) {
            self.counts.items += 1;
            self.counts.files += 1;
        }

        Ok(())
    }

    /// Relocate an existing collection and ripple the move to every
    /// collection nested under its old path. Returns whether a collection
    /// for `id` already existed.
    fn update_collection_paths(&mut self, id: &str, current: &RepoPath) -> bool {
        let initial = match self.collections.get_mut(id) {
            None => return false,
            Some(collection) => {
                let Some(existing) = collection.full_path().cloned() else {
                    // A tombstone for this id; nothing to ripple.
                    return true;
                };

                if existing == *current {
                    return true;
                }

                collection.set_full_path(current.clone());
                existing
            }
        };

        for (other_id, collection) in self.collections.iter_mut() {
            if other_id == id {
                continue;
            }

            if let Some(full) = collection.full_path() {
                let mut updated = full.clone();
                if updated.update_parent(&initial, current) {
                    collection.set_full_path(updated);
                }
            }
        }

        true
    }

    /// Record a container's new path, rewriting every entry under its old
    /// path by prefix substitution
    fn update_path(paths: &mut BTreeMap<String, String>, id: &str, new_path: String) {
        let Some(old_path) = paths.get(id).cloned() else {
            paths.insert(id.to_string(), new_path);
            return;
        };

        if old_path == new_path {
            return;
        }

        for value in paths.values_mut() {
            if let Some(rewritten) = replace_path_prefix(value, &old_path, &new_path) {
                *value = rewritten;
            }
        }

        // The entry itself, in case it wasn't prefixed by its own old path
        // (it always is, but the map must end up correct regardless).
        paths.insert(id.to_string(), new_path);
    }

    fn should_skip_drive(&self, path: Option<&RepoPath>) -> bool {
        let Some(path) = path else {
            return false;
        };

        if self.category == Category::Libraries && self.drive_name == RESTRICTED_DIRECTORY {
            return true;
        }

        !self.include_path(path)
    }

    fn include_path(&self, path: &RepoPath) -> bool {
        let Ok(folder) = path.drive_folder_path() else {
            // Not drive-anchored; leave scope decisions to the caller.
            return true;
        };

        // The drive root has an empty folder path; an unrestricted
        // selector always includes it.
        if folder.is_empty() && self.matcher.is_any() {
            return true;
        }

        self.matcher.matches(&folder)
    }

    /// Exposed for the enumerator's tombstone synthesis
    #[must_use]
    pub fn collection_full_paths(&self) -> BTreeSet<String> {
        self.collections
            .values()
            .filter_map(|c| c.full_path().map(|p| p.to_string()))
            .collect()
    }

    /// Register a synthesized tombstone (used by the enumerator after a
    /// reset, when delete events never arrive)
    pub fn insert_tombstone(&mut self, id: &str, prev: RepoPath) {
        let tombstone = DriveCollection::new(
            Arc::clone(&self.transport),
            None,
            Some(prev),
            self.drive_id.clone(),
            self.drive_name.clone(),
            self.category,
            self.options.clone(),
            self.invalid_prev_delta,
        );
        self.collections.insert(id.to_string(), tombstone);
    }

    #[must_use]
    pub fn invalid_prev_delta(&self) -> bool {
        self.invalid_prev_delta
    }

    #[must_use]
    pub fn new_paths(&self) -> &BTreeMap<String, String> {
        &self.new_paths
    }

    /// Tear down into the run's outputs
    #[must_use]
    pub fn into_results(self) -> ReconcileResults {
        ReconcileResults {
            collections: self.collections,
            new_paths: self.new_paths,
            excluded: self.excluded,
            counts: self.counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphvault_core::domain::{CollectionState, DeltaToken, ItemId};
    use graphvault_core::ports::selector::AnyFolder;
    use graphvault_core::ports::transport::{
        ContainerInfo, Drive, ItemPager, ParentRef, Permission,
    };
    use proptest::prelude::*;

    struct NullDrive;

    #[async_trait]
    impl DriveClient for NullDrive {
        async fn list_drives(&self, _owner: &str) -> Result<Vec<Drive>, EngineError> {
            Ok(Vec::new())
        }

        async fn drive_root(&self, _drive_id: &DriveId) -> Result<ContainerInfo, EngineError> {
            unimplemented!("not used in reconciler tests")
        }

        fn item_pager(
            &self,
            _drive_id: &DriveId,
            _token: Option<DeltaToken>,
        ) -> Box<dyn ItemPager> {
            unimplemented!("not used in reconciler tests")
        }

        async fn get_item(
            &self,
            _drive_id: &DriveId,
            _item_id: &ItemId,
        ) -> Result<graphvault_core::ports::transport::DriveItem, EngineError> {
            unimplemented!("not used in reconciler tests")
        }

        async fn download(
            &self,
            _drive_id: &DriveId,
            _item: &graphvault_core::ports::transport::DriveItem,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(Vec::new())
        }

        async fn permissions(
            &self,
            _drive_id: &DriveId,
            _item_id: &ItemId,
        ) -> Result<Vec<Permission>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn reconciler(initial: BTreeMap<String, String>, invalid: bool) -> Reconciler {
        Reconciler::new(
            "tenant",
            "user@example.com",
            Category::Files,
            DriveId::new("d1").unwrap(),
            "My Drive",
            Arc::new(NullDrive),
            Arc::new(AnyFolder),
            Options::default(),
            initial,
            invalid,
        )
    }

    fn root_event() -> DriveItem {
        DriveItem {
            id: ItemId::new("root-id").unwrap(),
            name: "root".into(),
            kind: ItemKind::Root,
            deleted: false,
            parent: None,
            size: 0,
            created: None,
            modified: None,
            download_url: None,
        }
    }

    fn folder_event(id: &str, name: &str, parent_id: &str, parent_path: &str) -> DriveItem {
        DriveItem {
            id: ItemId::new(id).unwrap(),
            name: name.into(),
            kind: ItemKind::Folder,
            deleted: false,
            parent: Some(ParentRef {
                id: Some(graphvault_core::domain::ContainerId::new(parent_id).unwrap()),
                path: Some(parent_path.into()),
            }),
            size: 0,
            created: None,
            modified: None,
            download_url: None,
        }
    }

    fn file_event(id: &str, name: &str, parent_id: &str, parent_path: &str) -> DriveItem {
        DriveItem {
            kind: ItemKind::File,
            size: 42,
            ..folder_event(id, name, parent_id, parent_path)
        }
    }

    fn delete_event(id: &str, kind: ItemKind, parent_id: &str) -> DriveItem {
        DriveItem {
            id: ItemId::new(id).unwrap(),
            name: String::new(),
            kind,
            deleted: true,
            parent: Some(ParentRef {
                id: Some(graphvault_core::domain::ContainerId::new(parent_id).unwrap()),
                path: None,
            }),
            size: 0,
            created: None,
            modified: None,
            download_url: None,
        }
    }

    const ROOT_RAW: &str = "/drives/d1/root:";
    const PREFIX: &str = "tenant/onedrive/user@example.com/files/drives/d1/root:";

    fn bus() -> Arc<FaultBus> {
        FaultBus::new(false)
    }

    #[test]
    fn first_run_builds_collections_and_paths() {
        let mut r = reconciler(BTreeMap::new(), true);
        let b = bus();

        r.apply_page(
            vec![
                root_event(),
                folder_event("fA", "A", "root-id", ROOT_RAW),
                file_event("f1", "one.txt", "fA", &format!("{ROOT_RAW}/A")),
            ],
            &BTreeMap::new(),
            &b,
        )
        .unwrap();

        let results = r.into_results();
        assert_eq!(results.new_paths.len(), 2);
        assert_eq!(results.new_paths["root-id"], PREFIX);
        assert_eq!(results.new_paths["fA"], format!("{PREFIX}/A"));

        let col = &results.collections["fA"];
        assert_eq!(col.state(), CollectionState::New);
        assert!(col.contains(&ItemId::new("f1").unwrap()));

        // Rebuilt enumeration: no graft, no exclusions.
        assert!(results.excluded.is_empty());
        assert!(b.snapshot().is_clean());
    }

    #[test]
    fn modified_file_is_excluded_and_collection_not_moved() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fA".to_string(), format!("{PREFIX}/A"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        r.apply_page(
            vec![file_event("f1", "one.txt", "fA", &format!("{ROOT_RAW}/A"))],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        let col = &results.collections["fA"];
        assert_eq!(col.state(), CollectionState::NotMoved);
        assert_eq!(
            results.excluded.iter().cloned().collect::<Vec<_>>(),
            vec!["f1.data".to_string(), "f1.meta".to_string()]
        );
    }

    #[test]
    fn folder_rename_ripples_to_descendants() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fA".to_string(), format!("{PREFIX}/A"));
        old.insert("fB".to_string(), format!("{PREFIX}/A/B"));
        old.insert("fC".to_string(), format!("{PREFIX}/A/B/C"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        // A is renamed to A2; no descendant events arrive.
        r.apply_page(
            vec![folder_event("fA", "A2", "root-id", ROOT_RAW)],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        assert_eq!(results.new_paths["fA"], format!("{PREFIX}/A2"));
        assert_eq!(results.new_paths["fB"], format!("{PREFIX}/A2/B"));
        assert_eq!(results.new_paths["fC"], format!("{PREFIX}/A2/B/C"));

        let col = &results.collections["fA"];
        assert_eq!(col.state(), CollectionState::Moved);
        assert_eq!(
            col.previous_path().unwrap().to_string(),
            format!("{PREFIX}/A")
        );
    }

    #[test]
    fn rename_ripples_through_existing_collections() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fA".to_string(), format!("{PREFIX}/A"));
        old.insert("fB".to_string(), format!("{PREFIX}/A/B"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        // B shows up first (a file changed inside it), then A is renamed.
        r.apply_page(
            vec![
                folder_event("fB", "B", "fA", &format!("{ROOT_RAW}/A")),
                folder_event("fA", "A2", "root-id", ROOT_RAW),
            ],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        let col_b = &results.collections["fB"];
        assert_eq!(
            col_b.full_path().unwrap().to_string(),
            format!("{PREFIX}/A2/B")
        );
        // B itself did not move relative to its previous path chain; its
        // recorded previous path is still under A.
        assert_eq!(col_b.state(), CollectionState::Moved);
    }

    #[test]
    fn folder_delete_builds_tombstone() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fB".to_string(), format!("{PREFIX}/B"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        r.apply_page(
            vec![delete_event("fB", ItemKind::Folder, "root-id")],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        assert!(!results.new_paths.contains_key("fB"));

        let tomb = &results.collections["fB"];
        assert_eq!(tomb.state(), CollectionState::Deleted);
        assert!(tomb.full_path().is_none());
        assert_eq!(
            tomb.previous_path().unwrap().to_string(),
            format!("{PREFIX}/B")
        );
    }

    #[test]
    fn delete_of_unknown_folder_is_silent() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        // Folder created and deleted between runs: no prev path entry.
        r.apply_page(
            vec![delete_event("ghost", ItemKind::Folder, "root-id")],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        assert!(results.collections.is_empty());
        assert!(b.snapshot().is_clean());
    }

    #[test]
    fn file_deleted_counts_but_streams_nothing() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fA".to_string(), format!("{PREFIX}/A"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        r.apply_page(vec![delete_event("f9", ItemKind::File, "fA")], &old, &b)
            .unwrap();

        let results = r.into_results();
        assert!(results.collections.is_empty());
        assert_eq!(results.counts.files, 1);
        assert!(results.excluded.contains("f9.data"));
        assert!(results.excluded.contains("f9.meta"));
    }

    #[test]
    fn file_delete_with_unknown_parent_drops_silently() {
        let mut r = reconciler(BTreeMap::new(), false);
        let b = bus();

        r.apply_page(
            vec![delete_event("f9", ItemKind::File, "never-seen")],
            &BTreeMap::new(),
            &b,
        )
        .unwrap();

        // Created and deleted between runs: no collection, no exclusion,
        // no fault.
        let results = r.into_results();
        assert!(results.collections.is_empty());
        assert!(results.excluded.is_empty());
        assert!(b.snapshot().is_clean());
    }

    #[test]
    fn mid_page_file_move_relocates_item() {
        let mut old = BTreeMap::new();
        old.insert("root-id".to_string(), PREFIX.to_string());
        old.insert("fA".to_string(), format!("{PREFIX}/A"));
        old.insert("fB".to_string(), format!("{PREFIX}/B"));

        let mut r = reconciler(old.clone(), false);
        let b = bus();

        r.apply_page(
            vec![
                file_event("f1", "doc.txt", "fA", &format!("{ROOT_RAW}/A")),
                file_event("f1", "doc.txt", "fB", &format!("{ROOT_RAW}/B")),
            ],
            &old,
            &b,
        )
        .unwrap();

        let results = r.into_results();
        let f1 = ItemId::new("f1").unwrap();
        assert!(!results.collections["fA"].contains(&f1));
        assert!(results.collections["fB"].contains(&f1));
        // Counted once despite being seen twice.
        assert_eq!(results.counts.files, 1);
    }

    #[test]
    fn malformed_event_is_recorded_not_fatal() {
        let mut r = reconciler(BTreeMap::new(), false);
        let b = bus();

        let mut bad = file_event("f1", "x.txt", "p", ROOT_RAW);
        bad.parent = None;

        r.apply_page(vec![bad], &BTreeMap::new(), &b).unwrap();

        let snap = b.snapshot();
        assert_eq!(snap.total_recovered, 1);
        assert!(matches!(snap.recovered[0], EngineError::Validation(_)));
    }

    #[test]
    fn empty_name_on_live_item_is_validation() {
        let mut r = reconciler(BTreeMap::new(), false);
        let b = bus();

        let mut bad = folder_event("fX", "", "root-id", ROOT_RAW);
        bad.name = String::new();

        r.apply_page(vec![bad], &BTreeMap::new(), &b).unwrap();
        assert_eq!(b.snapshot().total_recovered, 1);
    }

    #[test]
    fn file_before_folder_synthesizes_collection() {
        let mut r = reconciler(BTreeMap::new(), true);
        let b = bus();

        r.apply_page(
            vec![file_event("f1", "early.txt", "fZ", &format!("{ROOT_RAW}/Z"))],
            &BTreeMap::new(),
            &b,
        )
        .unwrap();

        let results = r.into_results();
        let col = &results.collections["fZ"];
        assert_eq!(
            col.full_path().unwrap().to_string(),
            format!("{PREFIX}/Z")
        );
        assert!(col.contains(&ItemId::new("f1").unwrap()));
    }

    #[test]
    fn selector_skips_out_of_scope_paths() {
        let mut r = Reconciler::new(
            "tenant",
            "user@example.com",
            Category::Files,
            DriveId::new("d1").unwrap(),
            "My Drive",
            Arc::new(NullDrive),
            Arc::new(graphvault_core::ports::selector::PrefixMatcher::new(["Keep"])),
            Options::default(),
            BTreeMap::new(),
            true,
        );
        let b = bus();

        r.apply_page(
            vec![
                folder_event("keep", "Keep", "root-id", ROOT_RAW),
                folder_event("drop", "Drop", "root-id", ROOT_RAW),
            ],
            &BTreeMap::new(),
            &b,
        )
        .unwrap();

        let results = r.into_results();
        assert!(results.collections.contains_key("keep"));
        assert!(!results.collections.contains_key("drop"));
    }

    #[test]
    fn restricted_library_directory_is_skipped() {
        let mut r = Reconciler::new(
            "tenant",
            "site-1",
            Category::Libraries,
            DriveId::new("lib-1").unwrap(),
            RESTRICTED_DIRECTORY,
            Arc::new(NullDrive),
            Arc::new(AnyFolder),
            Options::default(),
            BTreeMap::new(),
            true,
        );
        let b = bus();

        r.apply_page(
            vec![folder_event("p1", "Pages", "root-id", "/drives/lib-1/root:")],
            &BTreeMap::new(),
            &b,
        )
        .unwrap();

        assert!(r.into_results().collections.is_empty());
    }

    // ------------------------------------------------------------------
    // Subtree rewrite property
    // ------------------------------------------------------------------

    fn segment() -> impl Strategy<Value = String> {
        "[a-z]{1,4}".prop_map(|s| s)
    }

    proptest! {
        /// Random trees, random folder picked and renamed: every entry that
        /// sat under the folder's old path is re-prefixed by the new one,
        /// and nothing else changes.
        #[test]
        fn prop_update_path_rewrites_exactly_the_subtree(
            segments in proptest::collection::vec(
                proptest::collection::vec(segment(), 1..5),
                1..20,
            ),
            pick in 0usize..20,
            new_name in "[A-Z][a-z]{1,6}",
        ) {
            // Build a path map: entry i gets id "n<i>" and a path made of
            // its segment chain under a fixed root.
            let mut paths = BTreeMap::new();
            for (i, segs) in segments.iter().enumerate() {
                let mut p = String::from(PREFIX);
                for s in segs {
                    p.push('/');
                    p.push_str(s);
                }
                paths.insert(format!("n{i}"), p);
            }

            let pick = pick % segments.len();
            let target_id = format!("n{pick}");
            let old_path = paths[&target_id].clone();
            let new_path = {
                let mut base = old_path
                    .rsplit_once('/')
                    .map(|(dir, _)| dir.to_string())
                    .unwrap_or_default();
                base.push('/');
                base.push_str(&new_name);
                base
            };

            let before = paths.clone();
            Reconciler::update_path(&mut paths, &target_id, new_path.clone());

            for (id, old_value) in &before {
                let new_value = &paths[id];
                if let Some(expected) = replace_path_prefix(old_value, &old_path, &new_path) {
                    prop_assert_eq!(new_value, &expected);
                } else if id == &target_id {
                    prop_assert_eq!(new_value, &new_path);
                } else {
                    prop_assert_eq!(new_value, old_value);
                }
            }
        }
    }
}
