//! Drive backup collections
//!
//! A collection is one container's worth of items headed for the store.
//! Item payloads are wrapped in lazy readers so nothing downloads until the
//! store actually reads; metadata sidecars are fetched up front under the
//! collection's fan-out bound.

use std::collections::HashMap;
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::control::Options;
use graphvault_core::domain::{
    state_of, Category, CollectionState, DriveId, EngineError, ItemId, ItemKind, RepoPath,
};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::store::{BackupCollection, BackupItem, InfoKind, ItemInfo, LazyData};
use graphvault_core::ports::transport::{DriveClient, DriveItem, Permission};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Suffix of the content blob for a file item
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Suffix of the metadata sidecar for a file item
pub const META_FILE_SUFFIX: &str = ".meta";

/// Suffix of the metadata sidecar for a folder or package item
pub const DIR_META_FILE_SUFFIX: &str = ".dirmeta";

/// Sidecar document stored next to each item's bytes
///
/// Always emitted, possibly with an empty permission list, so restores can
/// rely on the sidecar existing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

/// One drive container's collection
pub struct DriveCollection {
    transport: Arc<dyn DriveClient>,
    category: Category,
    drive_id: DriveId,
    drive_name: String,
    full_path: Option<RepoPath>,
    prev_path: Option<RepoPath>,
    state: CollectionState,
    do_not_merge: bool,
    items: HashMap<String, DriveItem>,
    options: Options,
}

impl DriveCollection {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        transport: Arc<dyn DriveClient>,
        full_path: Option<RepoPath>,
        prev_path: Option<RepoPath>,
        drive_id: DriveId,
        drive_name: impl Into<String>,
        category: Category,
        options: Options,
        do_not_merge: bool,
    ) -> Self {
        let state = state_of(prev_path.as_ref(), full_path.as_ref());

        Self {
            transport,
            category,
            drive_id,
            drive_name: drive_name.into(),
            full_path,
            prev_path,
            state,
            do_not_merge,
            items: HashMap::new(),
            options,
        }
    }

    /// Register an item. Returns true when it wasn't already present.
    pub fn add(&mut self, item: DriveItem) -> bool {
        self.items
            .insert(item.id.as_str().to_string(), item)
            .is_none()
    }

    /// Drop an item. Returns true when it was present.
    pub fn remove(&mut self, id: &ItemId) -> bool {
        self.items.remove(id.as_str()).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Move the collection to a new path, recomputing its state
    pub fn set_full_path(&mut self, path: RepoPath) {
        self.full_path = Some(path);
        self.state = state_of(self.prev_path.as_ref(), self.full_path.as_ref());
    }

    #[must_use]
    pub fn drive_id(&self) -> &DriveId {
        &self.drive_id
    }
}

impl BackupCollection for DriveCollection {
    fn full_path(&self) -> Option<&RepoPath> {
        self.full_path.as_ref()
    }

    fn previous_path(&self) -> Option<&RepoPath> {
        self.prev_path.as_ref()
    }

    fn state(&self) -> CollectionState {
        self.state
    }

    fn do_not_merge_items(&self) -> bool {
        self.do_not_merge
    }

    fn items(&self, cancel: CancelToken, bus: Arc<FaultBus>) -> mpsc::Receiver<BackupItem> {
        let (tx, rx) = mpsc::channel(self.options.collection_buffer.max(1));

        let job = PopulateJob {
            transport: Arc::clone(&self.transport),
            category: self.category,
            drive_id: self.drive_id.clone(),
            drive_name: self.drive_name.clone(),
            parent_path: self
                .full_path
                .as_ref()
                .map(|p| p.drive_folder_path().unwrap_or_else(|_| p.folder_path()))
                .unwrap_or_default(),
            items: self.items.values().cloned().collect(),
            options: self.options.clone(),
        };

        tokio::spawn(populate_items(job, tx, cancel, bus));

        rx
    }
}

struct PopulateJob {
    transport: Arc<dyn DriveClient>,
    category: Category,
    drive_id: DriveId,
    drive_name: String,
    parent_path: String,
    items: Vec<DriveItem>,
    options: Options,
}

/// Stream the collection's items into the channel
///
/// Fan-out is bounded by the options' fetch concurrency; the channel bound
/// provides back-pressure against a slow store.
async fn populate_items(
    job: PopulateJob,
    tx: mpsc::Sender<BackupItem>,
    cancel: CancelToken,
    bus: Arc<FaultBus>,
) {
    let semaphore = Arc::new(Semaphore::new(job.options.fetch_concurrency.max(1)));
    let mut handles = Vec::with_capacity(job.items.len());
    let total = job.items.len();

    let shared = Arc::new((job.transport, job.drive_id, job.drive_name, job.parent_path));

    for item in job.items {
        if cancel.is_cancelled() || (job.options.fail_fast && bus.aborted()) {
            break;
        }

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("collection semaphore closed");

        let tx = tx.clone();
        let bus = Arc::clone(&bus);
        let shared = Arc::clone(&shared);
        let category = job.category;
        let backup_permissions = job.options.backup_permissions;

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let (transport, drive_id, drive_name, parent_path) = &*shared;

            stream_one_item(
                transport,
                drive_id,
                drive_name,
                parent_path,
                category,
                backup_permissions,
                item,
                &tx,
                &bus,
            )
            .await;
        }));
    }

    for handle in handles {
        if handle.await.is_err() {
            bus.add_recoverable(EngineError::Consistency(
                "collection item task panicked".into(),
            ));
        }
    }

    debug!(total, "collection streaming complete");
}

#[allow(clippy::too_many_arguments)]
async fn stream_one_item(
    transport: &Arc<dyn DriveClient>,
    drive_id: &DriveId,
    drive_name: &str,
    parent_path: &str,
    category: Category,
    backup_permissions: bool,
    item: DriveItem,
    tx: &mpsc::Sender<BackupItem>,
    bus: &Arc<FaultBus>,
) {
    let item_id = item.id.as_str().to_string();
    let is_file = item.kind == ItemKind::File;

    // Sidecar first: fetched eagerly so a permission failure surfaces here
    // rather than mid-stream.
    let permissions = if backup_permissions {
        match transport.permissions(drive_id, &item.id).await {
            Ok(perms) => perms,
            Err(err) => {
                bus.add_recoverable(EngineError::Validation(format!(
                    "fetching permissions for {item_id}: {err}"
                )));
                return;
            }
        }
    } else {
        Vec::new()
    };

    let metadata = ItemMetadata {
        file_name: item.name.clone(),
        permissions,
    };

    let meta_bytes = match serde_json::to_vec(&metadata) {
        Ok(bytes) => bytes,
        Err(err) => {
            bus.add_recoverable(EngineError::Validation(format!(
                "serializing metadata for {item_id}: {err}"
            )));
            return;
        }
    };

    let info_kind = match category {
        Category::Libraries => InfoKind::ListItem,
        _ => InfoKind::DriveFile,
    };

    let modified = item.modified.unwrap_or_else(chrono::Utc::now);

    if is_file {
        let info = ItemInfo {
            kind: info_kind,
            name: item.name.clone(),
            drive_name: Some(drive_name.to_string()),
            parent_path: parent_path.to_string(),
            size: item.size,
            created: item.created,
            modified,
            is_meta: false,
        };

        let data = lazy_download(
            Arc::clone(transport),
            drive_id.clone(),
            item.clone(),
            Arc::clone(bus),
        );

        let sent = tx
            .send(BackupItem {
                id: format!("{item_id}{DATA_FILE_SUFFIX}"),
                deleted: false,
                modified: Some(modified),
                info: Some(info.clone()),
                data,
            })
            .await;

        if sent.is_err() {
            // Receiver gone; the store stopped reading.
            return;
        }

        let mut meta_info = info;
        meta_info.is_meta = true;
        // Sidecars always re-persist: permission state isn't covered by the
        // item's own modification time.
        meta_info.modified = chrono::Utc::now();

        let _ = tx
            .send(BackupItem {
                id: format!("{item_id}{META_FILE_SUFFIX}"),
                deleted: false,
                modified: Some(meta_info.modified),
                info: Some(meta_info),
                data: LazyData::ready(meta_bytes),
            })
            .await;
    } else {
        let info = ItemInfo {
            kind: InfoKind::Folder,
            name: item.name.clone(),
            drive_name: Some(drive_name.to_string()),
            parent_path: parent_path.to_string(),
            size: 0,
            created: item.created,
            modified,
            is_meta: true,
        };

        let _ = tx
            .send(BackupItem {
                id: format!("{item_id}{DIR_META_FILE_SUFFIX}"),
                deleted: false,
                modified: Some(modified),
                info: Some(info),
                data: LazyData::ready(meta_bytes),
            })
            .await;
    }
}

/// Deferred download with a one-shot refresh when the pre-signed URL has
/// expired by the time the store reads
fn lazy_download(
    transport: Arc<dyn DriveClient>,
    drive_id: DriveId,
    item: DriveItem,
    bus: Arc<FaultBus>,
) -> LazyData {
    LazyData::new(move || {
        Box::pin(async move {
            let first = transport.download(&drive_id, &item).await;

            let result = match first {
                Err(err) if err.is_auth_expired() => {
                    warn!(
                        item = item.id.as_str(),
                        "download url expired, refreshing item once"
                    );
                    match transport.get_item(&drive_id, &item.id).await {
                        Ok(refreshed) => transport.download(&drive_id, &refreshed).await,
                        Err(refresh_err) => Err(refresh_err),
                    }
                }
                other => other,
            };

            if let Err(err) = &result {
                bus.add_recoverable(err.clone());
            }

            result
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphvault_core::domain::DeltaToken;
    use graphvault_core::ports::transport::{ContainerInfo, Drive, ItemPager};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Drive transport that serves canned bytes and counts refreshes
    struct FakeDrive {
        downloads: AtomicUsize,
        refreshes: AtomicUsize,
        expire_first: bool,
    }

    impl FakeDrive {
        fn new(expire_first: bool) -> Arc<Self> {
            Arc::new(Self {
                downloads: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
                expire_first,
            })
        }
    }

    #[async_trait]
    impl DriveClient for FakeDrive {
        async fn list_drives(&self, _owner: &str) -> Result<Vec<Drive>, EngineError> {
            Ok(Vec::new())
        }

        async fn drive_root(&self, _drive_id: &DriveId) -> Result<ContainerInfo, EngineError> {
            unimplemented!("not used in collection tests")
        }

        fn item_pager(
            &self,
            _drive_id: &DriveId,
            _token: Option<DeltaToken>,
        ) -> Box<dyn ItemPager> {
            unimplemented!("not used in collection tests")
        }

        async fn get_item(
            &self,
            _drive_id: &DriveId,
            item_id: &ItemId,
        ) -> Result<DriveItem, EngineError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(test_item(item_id.as_str(), ItemKind::File))
        }

        async fn download(
            &self,
            _drive_id: &DriveId,
            item: &DriveItem,
        ) -> Result<Vec<u8>, EngineError> {
            let n = self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.expire_first && n == 0 {
                return Err(EngineError::AuthExpired("url ttl elapsed".into()));
            }
            Ok(format!("content-of-{}", item.id.as_str()).into_bytes())
        }

        async fn permissions(
            &self,
            _drive_id: &DriveId,
            _item_id: &ItemId,
        ) -> Result<Vec<Permission>, EngineError> {
            Ok(vec![Permission {
                id: "perm-1".into(),
                roles: vec!["read".into()],
                granted_to: Some("Reviewer".into()),
                expiration: None,
            }])
        }
    }

    fn test_item(id: &str, kind: ItemKind) -> DriveItem {
        DriveItem {
            id: ItemId::new(id).unwrap(),
            name: format!("{id}.bin"),
            kind,
            deleted: false,
            parent: None,
            size: 7,
            created: None,
            modified: None,
            download_url: None,
        }
    }

    fn collection(transport: Arc<FakeDrive>, opts: Options) -> DriveCollection {
        let full = RepoPath::build(
            "t",
            "u",
            Category::Files,
            ["drives", "d1", "root:", "Documents"],
        )
        .unwrap();

        DriveCollection::new(
            transport,
            Some(full),
            None,
            DriveId::new("d1").unwrap(),
            "OneDrive",
            Category::Files,
            opts,
            false,
        )
    }

    async fn drain(mut rx: mpsc::Receiver<BackupItem>) -> Vec<BackupItem> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn file_streams_data_and_meta() {
        let transport = FakeDrive::new(false);
        let mut col = collection(Arc::clone(&transport), Options::default());
        assert!(col.add(test_item("f1", ItemKind::File)));

        let bus = FaultBus::new(false);
        let items = drain(col.items(CancelToken::new(), Arc::clone(&bus))).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "f1.data");
        assert_eq!(items[1].id, "f1.meta");
        assert!(items[1].info.as_ref().unwrap().is_meta);
        assert_eq!(items[0].info.as_ref().unwrap().parent_path, "Documents");

        // Nothing downloaded until a reader pulls.
        assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);

        let mut iter = items.into_iter();
        let data = iter.next().unwrap().data.read().await.unwrap();
        assert_eq!(data, b"content-of-f1".to_vec());
        assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);

        let meta: ItemMetadata =
            serde_json::from_slice(&iter.next().unwrap().data.read().await.unwrap()).unwrap();
        assert_eq!(meta.file_name, "f1.bin");
        assert_eq!(meta.permissions.len(), 1);

        assert!(bus.snapshot().is_clean());
    }

    #[tokio::test]
    async fn folder_streams_dirmeta_only() {
        let transport = FakeDrive::new(false);
        let mut col = collection(transport, Options::default());
        col.add(test_item("dir1", ItemKind::Folder));

        let bus = FaultBus::new(false);
        let items = drain(col.items(CancelToken::new(), bus)).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "dir1.dirmeta");
        assert!(items[0].info.as_ref().unwrap().is_meta);
    }

    #[tokio::test]
    async fn expired_url_triggers_single_refresh() {
        let transport = FakeDrive::new(true);
        let mut col = collection(Arc::clone(&transport), Options::default());
        col.add(test_item("f1", ItemKind::File));

        let bus = FaultBus::new(false);
        let items = drain(col.items(CancelToken::new(), bus)).await;

        let data = items
            .into_iter()
            .next()
            .unwrap()
            .data
            .read()
            .await
            .unwrap();

        assert_eq!(data, b"content-of-f1".to_vec());
        assert_eq!(transport.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permissions_toggle_off_emits_empty_sidecar() {
        let transport = FakeDrive::new(false);
        let opts = Options {
            backup_permissions: false,
            ..Options::default()
        };
        let mut col = collection(transport, opts);
        col.add(test_item("f1", ItemKind::File));

        let bus = FaultBus::new(false);
        let items = drain(col.items(CancelToken::new(), bus)).await;

        let meta_item = items.into_iter().nth(1).unwrap();
        let meta: ItemMetadata =
            serde_json::from_slice(&meta_item.data.read().await.unwrap()).unwrap();
        assert!(meta.permissions.is_empty());
    }

    #[tokio::test]
    async fn add_remove_semantics() {
        let transport = FakeDrive::new(false);
        let mut col = collection(transport, Options::default());

        let item = test_item("x", ItemKind::File);
        assert!(col.add(item.clone()));
        assert!(!col.add(item.clone()));
        assert_eq!(col.len(), 1);

        assert!(col.remove(&item.id));
        assert!(!col.remove(&item.id));
        assert!(col.is_empty());
    }

    #[tokio::test]
    async fn set_full_path_recomputes_state() {
        let transport = FakeDrive::new(false);
        let prev = RepoPath::build("t", "u", Category::Files, ["drives", "d1", "root:", "Old"])
            .unwrap();

        let mut col = DriveCollection::new(
            transport,
            Some(prev.clone()),
            Some(prev.clone()),
            DriveId::new("d1").unwrap(),
            "OneDrive",
            Category::Files,
            Options::default(),
            false,
        );
        assert_eq!(col.state(), CollectionState::NotMoved);

        let moved = RepoPath::build("t", "u", Category::Files, ["drives", "d1", "root:", "New"])
            .unwrap();
        col.set_full_path(moved);
        assert_eq!(col.state(), CollectionState::Moved);
    }
}
