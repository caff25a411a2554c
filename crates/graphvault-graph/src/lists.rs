//! List capability implementation
//!
//! Auxiliary endpoints for site document-library lists: columns, content
//! types, column links, and per-item fields. Responses are passed through
//! as opaque JSON; the engine only orchestrates the fetches.

use std::sync::Arc;

use async_trait::async_trait;
use graphvault_core::domain::{ContainerId, EngineError, ItemId};
use graphvault_core::ports::transport::{ContainerClient, ContainerInfo, ListClient};
use tracing::warn;

use crate::client::GraphClient;
use crate::models::{RawCollectionPage, RawContainer};

/// List-side transport against a graph API
pub struct GraphListClient {
    client: Arc<GraphClient>,
}

impl GraphListClient {
    #[must_use]
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self { client }
    }

    /// Drain a paged collection of opaque values
    async fn drain(
        &self,
        first_path: String,
        context: &'static str,
    ) -> Result<Vec<serde_json::Value>, EngineError> {
        let mut out = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let page: RawCollectionPage<serde_json::Value> = match &next {
                Some(link) => self.client.get_json_url(link, context).await?,
                None => self.client.get_json(&first_path, context).await?,
            };

            out.extend(page.value);

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl ContainerClient for GraphListClient {
    async fn get_container(
        &self,
        owner: &str,
        container_id: &ContainerId,
    ) -> Result<ContainerInfo, EngineError> {
        let path = format!("/sites/{owner}/lists/{}", container_id.as_str());
        let raw: RawContainer = self.client.get_json(&path, "fetching list").await?;
        let mut info = raw.into_container()?;

        // Lists are not guaranteed a display name; fall back to the id.
        if info.display_name.is_empty() {
            info.display_name = info.id.as_str().to_string();
        }
        Ok(info)
    }

    async fn list_containers(
        &self,
        owner: &str,
        _base_id: &ContainerId,
    ) -> Result<Vec<ContainerInfo>, EngineError> {
        let mut lists = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let page: RawCollectionPage<RawContainer> = match &next {
                Some(link) => self.client.get_json_url(link, "listing lists").await?,
                None => {
                    self.client
                        .get_json(&format!("/sites/{owner}/lists"), "listing lists")
                        .await?
                }
            };

            for raw in page.value {
                match raw.into_container() {
                    Ok(mut info) => {
                        if info.display_name.is_empty() {
                            info.display_name = info.id.as_str().to_string();
                        }
                        lists.push(info);
                    }
                    Err(err) => warn!(error = %err, "dropping malformed list"),
                }
            }

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        Ok(lists)
    }
}

#[async_trait]
impl ListClient for GraphListClient {
    async fn list_items(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<ItemId>, EngineError> {
        let rows = self
            .drain(
                format!("/sites/{owner}/lists/{}/items", list_id.as_str()),
                "listing list items",
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| ItemId::new(id).ok())
            })
            .collect())
    }

    async fn columns(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<serde_json::Value>, EngineError> {
        self.drain(
            format!("/sites/{owner}/lists/{}/columns", list_id.as_str()),
            "listing columns",
        )
        .await
    }

    async fn content_types(
        &self,
        owner: &str,
        list_id: &ContainerId,
    ) -> Result<Vec<serde_json::Value>, EngineError> {
        self.drain(
            format!("/sites/{owner}/lists/{}/contentTypes", list_id.as_str()),
            "listing content types",
        )
        .await
    }

    async fn column_links(
        &self,
        owner: &str,
        list_id: &ContainerId,
        content_type_id: &str,
    ) -> Result<Vec<serde_json::Value>, EngineError> {
        self.drain(
            format!(
                "/sites/{owner}/lists/{}/contentTypes/{content_type_id}/columnLinks",
                list_id.as_str()
            ),
            "listing column links",
        )
        .await
    }

    async fn item_fields(
        &self,
        owner: &str,
        list_id: &ContainerId,
        item_id: &ItemId,
    ) -> Result<serde_json::Value, EngineError> {
        let path = format!(
            "/sites/{owner}/lists/{}/items/{}/fields",
            list_id.as_str(),
            item_id.as_str()
        );
        self.client.get_json(&path, "fetching item fields").await
    }
}
