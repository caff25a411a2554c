//! Transport port (driven side)
//!
//! A narrow capability set per category, implemented by the graph adapter
//! and mocked in engine tests. The DTOs here are port-level data, already
//! lifted out of the wire format; the adapter owns the raw JSON shapes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::domain::{ContainerId, DeltaToken, DriveId, EngineError, ItemId, ItemKind};

// ============================================================================
// DTOs
// ============================================================================

/// Reference to an item's parent container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Parent container id; absent only on malformed events
    pub id: Option<ContainerId>,
    /// Raw server-side parent path, e.g. `/drives/<id>/root:/A/B`.
    /// Absent for deleted items.
    pub path: Option<String>,
}

/// One item event from a delta enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveItem {
    pub id: ItemId,
    /// Empty only for deleted items
    pub name: String,
    pub kind: ItemKind,
    pub deleted: bool,
    pub parent: Option<ParentRef>,
    pub size: i64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Pre-signed content URL, when the server included one. Expires;
    /// refreshed via [`DriveClient::get_item`] on auth failure.
    pub download_url: Option<String>,
}

/// One page of a delta enumeration
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    pub items: Vec<DriveItem>,
    /// Continuation link; present on every page but the last
    pub next_link: Option<String>,
    /// Terminal token link; present only on the last page
    pub delta_link: Option<String>,
}

/// A drive or document library owned by a resource owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: DriveId,
    pub name: String,
}

/// A logical container (mail folder, contacts folder, calendar, list)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub parent_id: Option<ContainerId>,
    pub display_name: String,
}

/// A sharing permission attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// Result of one full mailbox-style delta pass over a container
#[derive(Debug, Clone, Default)]
pub struct AddedAndRemoved {
    pub added: Vec<ItemId>,
    pub removed: Vec<ItemId>,
    /// Token for the next pass; absent when the server withheld one
    pub delta: Option<DeltaToken>,
    /// True when the prior token was rejected and the results were
    /// re-enumerated from scratch
    pub reset: bool,
}

// ============================================================================
// Pager
// ============================================================================

/// A lazy, restartable sequence of delta pages for one endpoint
///
/// `next_page` returns `Ok(None)` after the terminal page. A server-side
/// token invalidation surfaces as `EngineError::ResyncRequired`; the caller
/// then invokes [`ItemPager::reset`] and resumes pulling pages, now from an
/// empty token.
#[async_trait]
pub trait ItemPager: Send {
    async fn next_page(&mut self, cancel: &CancelToken) -> Result<Option<DeltaPage>, EngineError>;

    /// Discard the current token and continuation state; the next
    /// `next_page` call starts a full enumeration
    fn reset(&mut self);
}

// ============================================================================
// Capability traits
// ============================================================================

/// Container fetch and enumeration, for categories with an explicit
/// container tree (mail, contacts, events, lists)
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Fetch a single container by id. Implementations accept the
    /// category's well-known aliases (e.g. `inbox`) as ids.
    async fn get_container(
        &self,
        owner: &str,
        container_id: &ContainerId,
    ) -> Result<ContainerInfo, EngineError>;

    /// Enumerate all containers below a base, following server paging
    async fn list_containers(
        &self,
        owner: &str,
        base_id: &ContainerId,
    ) -> Result<Vec<ContainerInfo>, EngineError>;
}

/// Drive enumeration and per-item access for drive-based categories
#[async_trait]
pub trait DriveClient: Send + Sync {
    async fn list_drives(&self, owner: &str) -> Result<Vec<Drive>, EngineError>;

    /// The drive's root item, used to seed the resolver
    async fn drive_root(&self, drive_id: &DriveId) -> Result<ContainerInfo, EngineError>;

    /// A pager over the drive's delta endpoint, starting from `token`
    /// (or from scratch when `None`)
    fn item_pager(&self, drive_id: &DriveId, token: Option<DeltaToken>) -> Box<dyn ItemPager>;

    /// Re-fetch a single item, refreshing its pre-signed download URL
    async fn get_item(&self, drive_id: &DriveId, item_id: &ItemId)
        -> Result<DriveItem, EngineError>;

    /// Download an item's content bytes, preferring its pre-signed URL
    async fn download(&self, drive_id: &DriveId, item: &DriveItem)
        -> Result<Vec<u8>, EngineError>;

    /// Sharing permissions for one item
    async fn permissions(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Vec<Permission>, EngineError>;
}

/// Per-container item deltas for mailbox-style categories
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Run the container's delta to completion, returning added and
    /// removed item ids plus the new token
    async fn added_and_removed(
        &self,
        owner: &str,
        container_id: &ContainerId,
        token: Option<&DeltaToken>,
        cancel: &CancelToken,
    ) -> Result<AddedAndRemoved, EngineError>;

    /// Serialized payload of one item (message, contact, event)
    async fn item_payload(&self, owner: &str, item_id: &ItemId) -> Result<Vec<u8>, EngineError>;
}

/// Auxiliary endpoints for document-library lists
///
/// Payloads are passed through opaquely; the store persists them verbatim.
#[async_trait]
pub trait ListClient: Send + Sync {
    /// Ids of the rows in a list, following server paging
    async fn list_items(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<ItemId>, EngineError>;

    async fn columns(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<serde_json::Value>, EngineError>;

    async fn content_types(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<serde_json::Value>, EngineError>;

    async fn column_links(
        &self,
        owner: &str,
        list_id: &ContainerId,
        content_type_id: &str,
    ) -> Result<Vec<serde_json::Value>, EngineError>;

    async fn item_fields(
        &self,
        owner: &str,
        list_id: &ContainerId,
        item_id: &ItemId,
    ) -> Result<serde_json::Value, EngineError>;
}
