//! Site list backup
//!
//! Lists ride alongside a site's document libraries: each list becomes one
//! collection holding a single JSON document assembled from the list's
//! auxiliary relationships (columns, content types with their column
//! links, and per-row fields). List fetches fan out through the pool; the
//! per-row field fetches inside one list stay sequential, with failures
//! recorded per row.

use std::collections::BTreeSet;
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::control::Options;
use graphvault_core::domain::{
    state_of, Category, CollectionState, ContainerId, EngineError, ItemId, RepoPath,
};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::store::{BackupCollection, BackupItem, InfoKind, ItemInfo, LazyData};
use graphvault_core::ports::transport::{ContainerClient, ListClient};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::enumerator::CategoryBackup;
use crate::pool::FetchPool;
use crate::stats::RunStats;

/// Path element the list collections live under, next to the drive tree
const LISTS_ROOT: &str = "lists";

/// Fully hydrated content of one list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContent {
    pub id: String,
    pub display_name: String,
    pub columns: Vec<serde_json::Value>,
    pub content_types: Vec<serde_json::Value>,
    pub rows: Vec<ListRow>,
}

/// One list row with its field values
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRow {
    pub id: String,
    pub fields: serde_json::Value,
}

/// Fetch a list's full content: columns, content types (with column links
/// grafted in), and rows with fields
///
/// # Errors
/// Propagates the first failure of the structural fetches; per-row field
/// failures are recorded on the bus and the row is kept without fields
async fn load_list(
    client: Arc<dyn ListClient>,
    owner: String,
    list_id: ContainerId,
    display_name: String,
    bus: Arc<FaultBus>,
) -> Result<ListContent, EngineError> {
    let columns = client.columns(&owner, &list_id).await?;

    let mut content_types = client.content_types(&owner, &list_id).await?;
    for content_type in &mut content_types {
        let Some(type_id) = content_type
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
        else {
            continue;
        };

        let links = client.column_links(&owner, &list_id, &type_id).await?;
        content_type["columnLinks"] = serde_json::Value::Array(links);
    }

    let row_ids = client.list_items(&owner, &list_id).await?;
    let mut rows = Vec::with_capacity(row_ids.len());

    for row_id in row_ids {
        match client.item_fields(&owner, &list_id, &row_id).await {
            Ok(fields) => rows.push(ListRow {
                id: row_id.as_str().to_string(),
                fields,
            }),
            Err(err) => {
                bus.add_recoverable(EngineError::Validation(format!(
                    "fetching fields for list row {row_id}: {err}"
                )));
                rows.push(ListRow {
                    id: row_id.as_str().to_string(),
                    fields: serde_json::Value::Null,
                });
            }
        }
    }

    debug!(
        list = list_id.as_str(),
        columns = columns.len(),
        content_types = content_types.len(),
        rows = rows.len(),
        "list content loaded"
    );

    Ok(ListContent {
        id: list_id.as_str().to_string(),
        display_name,
        columns,
        content_types,
        rows,
    })
}

/// A collection holding one list's serialized content
pub struct ListCollection {
    full_path: RepoPath,
    content: ListContent,
}

impl BackupCollection for ListCollection {
    fn full_path(&self) -> Option<&RepoPath> {
        Some(&self.full_path)
    }

    fn previous_path(&self) -> Option<&RepoPath> {
        None
    }

    fn state(&self) -> CollectionState {
        state_of(None, Some(&self.full_path))
    }

    fn do_not_merge_items(&self) -> bool {
        // List documents are rebuilt whole every run.
        true
    }

    fn items(&self, _cancel: CancelToken, bus: Arc<FaultBus>) -> mpsc::Receiver<BackupItem> {
        let (tx, rx) = mpsc::channel(1);

        let bytes = match serde_json::to_vec(&self.content) {
            Ok(bytes) => bytes,
            Err(err) => {
                bus.add_recoverable(EngineError::Validation(format!(
                    "serializing list {}: {err}",
                    self.content.id
                )));
                return rx;
            }
        };

        let modified = chrono::Utc::now();
        let info = ItemInfo {
            kind: InfoKind::ListItem,
            name: self.content.display_name.clone(),
            drive_name: None,
            parent_path: LISTS_ROOT.to_string(),
            size: bytes.len() as i64,
            created: None,
            modified,
            is_meta: false,
        };

        let _ = tx.try_send(BackupItem {
            id: self.content.id.clone(),
            deleted: false,
            modified: Some(modified),
            info: Some(info),
            data: LazyData::ready(bytes),
        });

        rx
    }
}

/// Produces list collections for one site
pub struct ListBackupProducer {
    tenant: String,
    owner: String,
    containers: Arc<dyn ContainerClient>,
    lists: Arc<dyn ListClient>,
    options: Options,
}

impl ListBackupProducer {
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        containers: Arc<dyn ContainerClient>,
        lists: Arc<dyn ListClient>,
        options: Options,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            owner: owner.into(),
            containers,
            lists,
            options,
        }
    }

    /// Enumerate the site's lists and hydrate each through the pool
    ///
    /// # Errors
    /// Propagates list enumeration failures and cancellation
    pub async fn collect(
        &self,
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Result<CategoryBackup, EngineError> {
        let base = ContainerId::new(LISTS_ROOT).expect("constant id");
        let lists = self.containers.list_containers(&self.owner, &base).await?;

        let pool = FetchPool::new(self.options.fetch_concurrency);

        let tasks: Vec<_> = lists
            .into_iter()
            .map(|list| {
                load_list(
                    Arc::clone(&self.lists),
                    self.owner.clone(),
                    list.id,
                    list.display_name,
                    Arc::clone(bus),
                )
            })
            .collect();

        let contents = pool.run_all(tasks, cancel, bus).await;

        let mut collections: Vec<Box<dyn BackupCollection>> = Vec::new();
        let mut stats = RunStats::default();

        for content in contents {
            let full_path = RepoPath::build(
                &self.tenant,
                &self.owner,
                Category::Libraries,
                [LISTS_ROOT.to_string(), content.id.clone()],
            )?;

            stats.containers += 1;
            stats.items += 1 + content.rows.len() as u64;

            collections.push(Box::new(ListCollection { full_path, content }));
        }

        info!(
            owner = %self.owner,
            lists = collections.len(),
            "site lists loaded"
        );

        Ok(CategoryBackup {
            collections,
            excluded: BTreeSet::new(),
            stats,
        })
    }
}
