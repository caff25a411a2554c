//! Mailbox-style enumeration
//!
//! Mail, contacts, and events enumerate per container: the resolver seeds
//! the container tree, each container runs its own item delta, and the
//! per-container token and path are persisted as a pair. Containers that
//! vanished since the previous run become tombstones.

use std::collections::BTreeSet;
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::control::Options;
use graphvault_core::domain::{
    state_of, Category, CollectionState, ContainerId, DeltaToken, EngineError, ItemId,
    PathBuilder, RepoPath,
};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::selector::FolderMatcher;
use graphvault_core::ports::store::{BackupCollection, BackupItem, InfoKind, ItemInfo, LazyData};
use graphvault_core::ports::transport::{ContainerClient, MailboxClient};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::enumerator::CategoryBackup;
use crate::metadata::{
    decode_mailbox_metadata, encode_mailbox_metadata, DeltaPath, DeltaPaths, MetadataCollection,
};
use crate::resolver::ContainerResolver;
use crate::stats::RunStats;

/// Well-known id of the mail folder hierarchy root; collapsed out of paths
pub const MAIL_ROOT: &str = "msgfolderroot";

/// Well-known id of the default contacts folder
pub const CONTACTS_ROOT: &str = "contacts";

/// Well-known id of the default calendar
pub const DEFAULT_CALENDAR: &str = "calendar";

fn info_kind(category: Category) -> InfoKind {
    match category {
        Category::Contacts => InfoKind::Contact,
        Category::Events => InfoKind::Event,
        _ => InfoKind::Mail,
    }
}

/// One mailbox container's collection
pub struct MailboxCollection {
    items_client: Arc<dyn MailboxClient>,
    owner: String,
    category: Category,
    full_path: Option<RepoPath>,
    prev_path: Option<RepoPath>,
    /// Display-name location, carried into item infos
    location: Option<PathBuilder>,
    state: CollectionState,
    do_not_merge: bool,
    added: Vec<ItemId>,
    removed: Vec<ItemId>,
    options: Options,
}

impl MailboxCollection {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        items_client: Arc<dyn MailboxClient>,
        owner: impl Into<String>,
        category: Category,
        full_path: Option<RepoPath>,
        prev_path: Option<RepoPath>,
        location: Option<PathBuilder>,
        options: Options,
        do_not_merge: bool,
    ) -> Self {
        let state = state_of(prev_path.as_ref(), full_path.as_ref());

        Self {
            items_client,
            owner: owner.into(),
            category,
            full_path,
            prev_path,
            location,
            state,
            do_not_merge,
            added: Vec::new(),
            removed: Vec::new(),
            options,
        }
    }

    pub fn set_items(&mut self, added: Vec<ItemId>, removed: Vec<ItemId>) {
        self.added = added;
        self.removed = removed;
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

impl BackupCollection for MailboxCollection {
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

        let client = Arc::clone(&self.items_client);
        let owner = self.owner.clone();
        let kind = info_kind(self.category);
        let parent_path = self
            .location
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or_default();
        let added = self.added.clone();
        let removed = self.removed.clone();
        let concurrency = self.options.fetch_concurrency.max(1);
        let fail_fast = self.options.fail_fast;

        tokio::spawn(async move {
            // Tombstone markers first; they carry no payload.
            for id in removed {
                let item = BackupItem {
                    id: id.as_str().to_string(),
                    deleted: true,
                    modified: None,
                    info: None,
                    data: LazyData::ready(Vec::new()),
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }

            let semaphore = Arc::new(Semaphore::new(concurrency));
            let mut handles = Vec::with_capacity(added.len());

            for id in added {
                if cancel.is_cancelled() || (fail_fast && bus.aborted()) {
                    break;
                }

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("mailbox semaphore closed");

                let client = Arc::clone(&client);
                let owner = owner.clone();
                let parent_path = parent_path.clone();
                let tx = tx.clone();
                let bus = Arc::clone(&bus);

                handles.push(tokio::spawn(async move {
                    let _permit = permit;

                    match client.item_payload(&owner, &id).await {
                        Ok(payload) => {
                            let modified = chrono::Utc::now();
                            let info = ItemInfo {
                                kind,
                                name: id.as_str().to_string(),
                                drive_name: None,
                                parent_path,
                                size: payload.len() as i64,
                                created: None,
                                modified,
                                is_meta: false,
                            };

                            let _ = tx
                                .send(BackupItem {
                                    id: id.as_str().to_string(),
                                    deleted: false,
                                    modified: Some(modified),
                                    info: Some(info),
                                    data: LazyData::ready(payload),
                                })
                                .await;
                        }
                        Err(err) => bus.add_recoverable(err),
                    }
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
        });

        rx
    }
}

/// Produces the backup collections for one (owner, mailbox category)
pub struct MailboxBackupProducer {
    tenant: String,
    owner: String,
    category: Category,
    containers: Arc<dyn ContainerClient>,
    items: Arc<dyn MailboxClient>,
    matcher: Arc<dyn FolderMatcher>,
    options: Options,
}

impl MailboxBackupProducer {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        category: Category,
        containers: Arc<dyn ContainerClient>,
        items: Arc<dyn MailboxClient>,
        matcher: Arc<dyn FolderMatcher>,
        options: Options,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            owner: owner.into(),
            category,
            containers,
            items,
            matcher,
            options,
        }
    }

    fn root_container(&self) -> (&'static str, PathBuilder) {
        // Mail collapses its hierarchy root out of storage paths; contacts
        // anchor under the well-known root folder; calendars are flat.
        match self.category {
            Category::Contacts => (CONTACTS_ROOT, PathBuilder::new().append(CONTACTS_ROOT)),
            Category::Events => (DEFAULT_CALENDAR, PathBuilder::new()),
            _ => (MAIL_ROOT, PathBuilder::new()),
        }
    }

    /// Enumerate every container of the category and assemble collections,
    /// per-container continuation state, and tombstones
    ///
    /// # Errors
    /// Propagates resolver population failures and cancellation; per
    /// container item-delta failures are recorded and skipped
    pub async fn collect(
        &self,
        prev_metadata: &[crate::metadata::MetadataFile],
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Result<CategoryBackup, EngineError> {
        let prev = match decode_mailbox_metadata(prev_metadata) {
            Ok(dps) => dps,
            Err(err) => {
                warn!(
                    category = %self.category,
                    error = %err,
                    "metadata conflict, forcing full enumeration"
                );
                bus.add_recoverable(err);
                DeltaPaths::new()
            }
        };

        let (root_id, base_storage) = self.root_container();
        let root = ContainerId::new(root_id).expect("well-known root ids are non-empty");

        let mut resolver = ContainerResolver::new();
        resolver
            .populate(
                &self.containers,
                &self.owner,
                &root,
                base_storage,
                PathBuilder::new(),
                true,
                cancel,
                bus,
            )
            .await?;

        let mut collections: Vec<Box<dyn BackupCollection>> = Vec::new();
        let mut new_dps = DeltaPaths::new();
        let mut live_paths: BTreeSet<String> = BTreeSet::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut stats = RunStats::default();

        let containers: Vec<(String, PathBuilder, PathBuilder)> = resolver
            .items()
            .filter(|(_, c)| {
                // The collapsed hierarchy root has an empty storage path
                // and is not itself a collection.
                c.storage_path().is_some_and(|s| !s.is_empty())
            })
            .map(|(id, c)| {
                (
                    id.to_string(),
                    c.storage_path().cloned().unwrap_or_default(),
                    c.display_path().cloned().unwrap_or_default(),
                )
            })
            .collect();

        for (container_id, storage, display) in containers {
            cancel.check()?;

            if !self.matcher.is_any() && !self.matcher.matches(&display.to_string()) {
                debug!(container = %container_id, "skipping out-of-scope container");
                continue;
            }

            let curr_path = RepoPath::build(
                &self.tenant,
                &self.owner,
                self.category,
                storage.elements().to_vec(),
            )?;

            let prev_entry = prev.get(&container_id);
            let prev_path = prev_entry.and_then(|dp| RepoPath::from_data_layer(&dp.path, false).ok());
            let prev_token = prev_entry.and_then(|dp| DeltaToken::new(dp.delta.clone()).ok());

            let result = match self
                .items
                .added_and_removed(
                    &self.owner,
                    &ContainerId::new(container_id.clone())?,
                    prev_token.as_ref(),
                    cancel,
                )
                .await
            {
                Ok(result) => result,
                Err(err) if err == EngineError::Cancelled => return Err(err),
                Err(err) => {
                    bus.add_recoverable(err);
                    if bus.aborted() {
                        return Err(bus.failure().unwrap_or(EngineError::Cancelled));
                    }
                    continue;
                }
            };

            seen.insert(container_id.clone());
            live_paths.insert(curr_path.to_string());

            stats.containers += 1;
            stats.items += (result.added.len() + result.removed.len()) as u64;

            let mut collection = MailboxCollection::new(
                Arc::clone(&self.items),
                &self.owner,
                self.category,
                Some(curr_path.clone()),
                prev_path,
                Some(display),
                self.options.clone(),
                result.reset,
            );
            collection.set_items(result.added, result.removed);
            collections.push(Box::new(collection));

            if let Some(token) = result.delta {
                new_dps.insert(
                    container_id,
                    DeltaPath {
                        delta: token.as_str().to_string(),
                        path: curr_path.to_string(),
                    },
                );
            }
        }

        // Containers known to the previous run that no longer exist become
        // tombstones, unless another container now occupies their path
        // (rename into the same location is not resurrection).
        for (container_id, dp) in &prev {
            if seen.contains(container_id) || live_paths.contains(&dp.path) {
                continue;
            }

            let Ok(prev_path) = RepoPath::from_data_layer(&dp.path, false) else {
                bus.add_recoverable(EngineError::InvalidPath(format!(
                    "unparseable previous path for container {container_id}"
                )));
                continue;
            };

            collections.push(Box::new(MailboxCollection::new(
                Arc::clone(&self.items),
                &self.owner,
                self.category,
                None,
                Some(prev_path),
                None,
                self.options.clone(),
                false,
            )));
        }

        let files = encode_mailbox_metadata(&new_dps);
        collections.push(Box::new(MetadataCollection::new(
            &self.tenant,
            &self.owner,
            self.category,
            files,
        )?));

        info!(
            category = %self.category,
            collections = collections.len(),
            "category enumeration complete"
        );

        Ok(CategoryBackup {
            collections,
            excluded: BTreeSet::new(),
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphvault_core::ports::transport::AddedAndRemoved;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeMailbox {
        payloads: HashMap<String, Vec<u8>>,
        deltas: Mutex<HashMap<String, AddedAndRemoved>>,
    }

    #[async_trait]
    impl MailboxClient for FakeMailbox {
        async fn added_and_removed(
            &self,
            _owner: &str,
            container_id: &ContainerId,
            _token: Option<&DeltaToken>,
            _cancel: &CancelToken,
        ) -> Result<AddedAndRemoved, EngineError> {
            Ok(self
                .deltas
                .lock()
                .unwrap()
                .remove(container_id.as_str())
                .unwrap_or_default())
        }

        async fn item_payload(
            &self,
            _owner: &str,
            item_id: &ItemId,
        ) -> Result<Vec<u8>, EngineError> {
            self.payloads
                .get(item_id.as_str())
                .cloned()
                .ok_or_else(|| EngineError::Validation(format!("no payload for {item_id}")))
        }
    }

    fn mail_path(folders: &[&str]) -> RepoPath {
        RepoPath::build("t", "u", Category::Mail, folders.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn collection_streams_removed_then_added() {
        let client = Arc::new(FakeMailbox {
            payloads: HashMap::from([("m1".to_string(), b"mime-bytes".to_vec())]),
            deltas: Mutex::new(HashMap::new()),
        });

        let mut collection = MailboxCollection::new(
            client,
            "u",
            Category::Mail,
            Some(mail_path(&["inbox-id"])),
            None,
            Some(PathBuilder::new().append("Inbox")),
            Options::default(),
            false,
        );
        collection.set_items(
            vec![ItemId::new("m1").unwrap()],
            vec![ItemId::new("gone").unwrap()],
        );

        assert_eq!(collection.state(), CollectionState::New);
        assert_eq!(collection.item_count(), 2);

        let mut rx = collection.items(CancelToken::new(), FaultBus::new(false));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.id, "gone");
        assert!(first.deleted);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.id, "m1");
        assert!(!second.deleted);
        let info = second.info.as_ref().unwrap();
        assert_eq!(info.parent_path, "Inbox");
        assert_eq!(second.data.read().await.unwrap(), b"mime-bytes".to_vec());

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn payload_failure_lands_on_bus() {
        let client = Arc::new(FakeMailbox {
            payloads: HashMap::new(),
            deltas: Mutex::new(HashMap::new()),
        });

        let mut collection = MailboxCollection::new(
            client,
            "u",
            Category::Mail,
            Some(mail_path(&["inbox-id"])),
            None,
            None,
            Options::default(),
            false,
        );
        collection.set_items(vec![ItemId::new("missing").unwrap()], Vec::new());

        let bus = FaultBus::new(false);
        let mut rx = collection.items(CancelToken::new(), Arc::clone(&bus));
        assert!(rx.recv().await.is_none());

        assert_eq!(bus.snapshot().total_recovered, 1);
    }

    #[test]
    fn state_classification() {
        let client = Arc::new(FakeMailbox {
            payloads: HashMap::new(),
            deltas: Mutex::new(HashMap::new()),
        });

        let moved = MailboxCollection::new(
            Arc::clone(&client) as Arc<dyn MailboxClient>,
            "u",
            Category::Mail,
            Some(mail_path(&["a"])),
            Some(mail_path(&["b"])),
            None,
            Options::default(),
            false,
        );
        assert_eq!(moved.state(), CollectionState::Moved);

        let tombstone = MailboxCollection::new(
            client,
            "u",
            Category::Mail,
            None,
            Some(mail_path(&["b"])),
            None,
            Options::default(),
            false,
        );
        assert_eq!(tombstone.state(), CollectionState::Deleted);
    }
}
