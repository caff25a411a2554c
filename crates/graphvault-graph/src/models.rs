//! Wire DTOs for graph-style responses
//!
//! Raw JSON shapes live here; conversion lifts them into the port-level
//! types the engine consumes. Facet presence (`file`, `folder`, `package`,
//! `root`, `deleted`) drives item classification, matching the server's
//! convention of signaling kind by attaching an empty object.

use chrono::{DateTime, Utc};
use graphvault_core::domain::{ContainerId, DriveId, EngineError, ItemId, ItemKind};
use graphvault_core::ports::transport::{
    ContainerInfo, DeltaPage, Drive, DriveItem, ParentRef, Permission,
};
use serde::Deserialize;

// ============================================================================
// Delta responses
// ============================================================================

/// One page of a delta response
#[derive(Debug, Deserialize)]
pub struct RawDeltaPage {
    #[serde(default)]
    pub value: Vec<RawDriveItem>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,

    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

/// A drive item as the server sends it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDriveItem {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub size: Option<i64>,

    pub created_date_time: Option<DateTime<Utc>>,
    pub last_modified_date_time: Option<DateTime<Utc>>,

    pub parent_reference: Option<RawParentReference>,

    pub file: Option<RawFileFacet>,
    pub folder: Option<RawFolderFacet>,
    pub package: Option<RawPackageFacet>,
    pub root: Option<serde_json::Value>,
    pub deleted: Option<RawDeletedFacet>,

    #[serde(rename = "@microsoft.graph.downloadUrl")]
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParentReference {
    pub id: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawFileFacet {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFolderFacet {
    pub child_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPackageFacet {
    #[serde(rename = "type")]
    pub package_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawDeletedFacet {
    pub state: Option<String>,
}

// ============================================================================
// Drives and containers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawDrive {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A paged listing of any resource
#[derive(Debug, Deserialize)]
pub struct RawCollectionPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Containers across categories share a shape; calendars use `name`
/// where folders use `displayName`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContainer {
    pub id: String,

    #[serde(default, alias = "name")]
    pub display_name: String,

    pub parent_folder_id: Option<String>,
}

/// A sharing permission as the server sends it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPermission {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    pub expiration_date_time: Option<DateTime<Utc>>,

    #[serde(rename = "grantedToV2")]
    pub granted_to: Option<serde_json::Value>,
}

impl RawPermission {
    pub fn into_permission(self) -> Permission {
        // The identity object nests the printable name a few levels deep;
        // anything unrecognized collapses to None.
        let granted_to = self.granted_to.as_ref().and_then(|v| {
            ["user", "siteUser", "group", "application"]
                .iter()
                .find_map(|k| v.get(k))
                .and_then(|ident| ident.get("displayName").or_else(|| ident.get("email")))
                .and_then(|n| n.as_str())
                .map(String::from)
        });

        Permission {
            id: self.id,
            roles: self.roles,
            granted_to,
            expiration: self.expiration_date_time,
        }
    }
}

/// Per-container delta entries for mailbox-style categories carry only
/// the id and an optional deleted marker
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMailboxItem {
    pub id: String,

    #[serde(rename = "@removed")]
    pub removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawMailboxDeltaPage {
    #[serde(default)]
    pub value: Vec<RawMailboxItem>,

    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,

    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

// ============================================================================
// Conversions
// ============================================================================

impl RawDriveItem {
    /// Lift into the port-level item
    ///
    /// # Errors
    /// Returns `EngineError::InvalidId` for an empty id
    pub fn into_item(self) -> Result<DriveItem, EngineError> {
        let kind = if self.root.is_some() {
            ItemKind::Root
        } else if self.package.is_some() {
            ItemKind::Package
        } else if self.folder.is_some() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };

        let parent = self.parent_reference.map(|p| ParentRef {
            id: p.id.and_then(|id| ContainerId::new(id).ok()),
            path: p.path,
        });

        Ok(DriveItem {
            id: ItemId::new(self.id)?,
            name: self.name,
            kind,
            deleted: self.deleted.is_some(),
            parent,
            size: self.size.unwrap_or(0),
            created: self.created_date_time,
            modified: self.last_modified_date_time,
            download_url: self.download_url,
        })
    }
}

impl RawDeltaPage {
    /// Lift a page, dropping items whose id fails validation onto the
    /// returned error list rather than poisoning the whole page
    pub fn into_page(self) -> (DeltaPage, Vec<EngineError>) {
        let mut items = Vec::with_capacity(self.value.len());
        let mut errors = Vec::new();

        for raw in self.value {
            match raw.into_item() {
                Ok(item) => items.push(item),
                Err(e) => errors.push(e),
            }
        }

        (
            DeltaPage {
                items,
                next_link: self.next_link,
                delta_link: self.delta_link,
            },
            errors,
        )
    }
}

impl RawDrive {
    /// # Errors
    /// Returns `EngineError::InvalidId` for an empty id
    pub fn into_drive(self) -> Result<Drive, EngineError> {
        let name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name
        };

        Ok(Drive {
            id: DriveId::new(self.id)?,
            name,
        })
    }
}

impl RawContainer {
    /// # Errors
    /// Returns `EngineError::InvalidId` for an empty id
    pub fn into_container(self) -> Result<ContainerInfo, EngineError> {
        Ok(ContainerInfo {
            id: ContainerId::new(self.id)?,
            parent_id: self
                .parent_folder_id
                .and_then(|id| ContainerId::new(id).ok()),
            display_name: self.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_file_item() {
        let json = r#"{
            "id": "item-001",
            "name": "document.docx",
            "size": 12345,
            "lastModifiedDateTime": "2026-06-15T10:30:00Z",
            "parentReference": {
                "id": "parent-001",
                "path": "/drives/d1/root:/Documents"
            },
            "file": { "mimeType": "application/msword" }
        }"#;

        let raw: RawDriveItem = serde_json::from_str(json).unwrap();
        let item = raw.into_item().unwrap();

        assert_eq!(item.id.as_str(), "item-001");
        assert_eq!(item.kind, ItemKind::File);
        assert!(!item.deleted);
        assert_eq!(item.size, 12345);
        let parent = item.parent.unwrap();
        assert_eq!(parent.id.unwrap().as_str(), "parent-001");
        assert_eq!(parent.path.as_deref(), Some("/drives/d1/root:/Documents"));
    }

    #[test]
    fn deserialize_folder_and_package() {
        let folder: RawDriveItem = serde_json::from_str(
            r#"{"id": "f1", "name": "Docs", "folder": {"childCount": 3}}"#,
        )
        .unwrap();
        assert_eq!(folder.into_item().unwrap().kind, ItemKind::Folder);

        let package: RawDriveItem = serde_json::from_str(
            r#"{"id": "p1", "name": "Notebook", "package": {"type": "oneNote"}}"#,
        )
        .unwrap();
        assert_eq!(package.into_item().unwrap().kind, ItemKind::Package);
    }

    #[test]
    fn deserialize_root_item() {
        let raw: RawDriveItem =
            serde_json::from_str(r#"{"id": "r1", "name": "root", "root": {}, "folder": {}}"#)
                .unwrap();
        // The root facet wins over the folder facet.
        assert_eq!(raw.into_item().unwrap().kind, ItemKind::Root);
    }

    #[test]
    fn deserialize_deleted_item() {
        let raw: RawDriveItem = serde_json::from_str(
            r#"{"id": "d1", "name": "old.txt", "deleted": {"state": "deleted"}}"#,
        )
        .unwrap();
        let item = raw.into_item().unwrap();
        assert!(item.deleted);
        assert_eq!(item.kind, ItemKind::File);
    }

    #[test]
    fn delta_page_links() {
        let json = r#"{
            "value": [{"id": "a", "name": "x", "file": {}}],
            "@odata.nextLink": "https://example.com/next"
        }"#;

        let raw: RawDeltaPage = serde_json::from_str(json).unwrap();
        let (page, errors) = raw.into_page();
        assert!(errors.is_empty());
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://example.com/next"));
        assert!(page.delta_link.is_none());
    }

    #[test]
    fn delta_page_collects_bad_items() {
        let json = r#"{"value": [{"id": "", "name": "broken"}, {"id": "ok", "file": {}}]}"#;

        let raw: RawDeltaPage = serde_json::from_str(json).unwrap();
        let (page, errors) = raw.into_page();
        assert_eq!(page.items.len(), 1);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn container_display_name_alias() {
        // Calendars use "name".
        let cal: RawContainer =
            serde_json::from_str(r#"{"id": "c1", "name": "Calendar"}"#).unwrap();
        assert_eq!(cal.into_container().unwrap().display_name, "Calendar");

        let folder: RawContainer = serde_json::from_str(
            r#"{"id": "m1", "displayName": "Inbox", "parentFolderId": "rootid"}"#,
        )
        .unwrap();
        let info = folder.into_container().unwrap();
        assert_eq!(info.display_name, "Inbox");
        assert_eq!(info.parent_id.unwrap().as_str(), "rootid");
    }

    #[test]
    fn mailbox_item_removed_marker() {
        let gone: RawMailboxItem =
            serde_json::from_str(r#"{"id": "m1", "@removed": {"reason": "deleted"}}"#).unwrap();
        assert!(gone.removed.is_some());

        let live: RawMailboxItem = serde_json::from_str(r#"{"id": "m2"}"#).unwrap();
        assert!(live.removed.is_none());
    }

    #[test]
    fn drive_name_falls_back_to_id() {
        let d: RawDrive = serde_json::from_str(r#"{"id": "drv"}"#).unwrap();
        let drive = d.into_drive().unwrap();
        assert_eq!(drive.name, "drv");
    }
}
