//! Mailbox capability implementation
//!
//! Container trees and per-container item deltas for the three
//! mailbox-style categories. Folder enumeration rides the category's
//! container delta endpoint, which returns the full tree (with parent ids)
//! rather than one level at a time; calendars are a flat namespace.

use std::sync::Arc;

use async_trait::async_trait;
use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::{ContainerId, DeltaToken, EngineError, ItemId};
use graphvault_core::ports::transport::{
    AddedAndRemoved, ContainerClient, ContainerInfo, MailboxClient,
};
use tracing::{debug, warn};

use crate::client::GraphClient;
use crate::models::{RawCollectionPage, RawContainer, RawMailboxDeltaPage};

/// Which mailbox-style category this client serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    Mail,
    Contacts,
    Events,
}

impl MailboxKind {
    fn container_segment(self) -> &'static str {
        match self {
            Self::Mail => "mailFolders",
            Self::Contacts => "contactFolders",
            Self::Events => "calendars",
        }
    }

    fn item_segment(self) -> &'static str {
        match self {
            Self::Mail => "messages",
            Self::Contacts => "contacts",
            Self::Events => "events",
        }
    }
}

/// Mailbox-side transport against a graph API
pub struct GraphMailboxClient {
    client: Arc<GraphClient>,
    kind: MailboxKind,
}

impl GraphMailboxClient {
    #[must_use]
    pub fn new(client: Arc<GraphClient>, kind: MailboxKind) -> Self {
        Self { client, kind }
    }

    #[must_use]
    pub fn kind(&self) -> MailboxKind {
        self.kind
    }

    fn container_path(&self, owner: &str, container_id: &str) -> String {
        format!(
            "/users/{owner}/{}/{container_id}",
            self.kind.container_segment()
        )
    }

    fn item_delta_path(&self, owner: &str, container_id: &str) -> String {
        format!(
            "/users/{owner}/{}/{container_id}/{}/delta",
            self.kind.container_segment(),
            self.kind.item_segment()
        )
    }

    /// One full pass over a container's item delta, following pagination
    async fn drain_item_delta(
        &self,
        owner: &str,
        container_id: &ContainerId,
        token: Option<&DeltaToken>,
        cancel: &CancelToken,
    ) -> Result<AddedAndRemoved, EngineError> {
        let mut result = AddedAndRemoved::default();
        let mut next: Option<String> = None;

        loop {
            cancel.check()?;

            let page: RawMailboxDeltaPage = match (&next, token) {
                (Some(link), _) => self.client.get_json_url(link, "item delta page").await?,
                (None, Some(t)) if t.as_str().starts_with("http") => {
                    self.client.get_json_url(t.as_str(), "item delta page").await?
                }
                (None, Some(t)) => {
                    let path = format!(
                        "{}?$deltatoken={}",
                        self.item_delta_path(owner, container_id.as_str()),
                        t.as_str()
                    );
                    self.client.get_json(&path, "item delta page").await?
                }
                (None, None) => {
                    let path = self.item_delta_path(owner, container_id.as_str());
                    self.client.get_json(&path, "item delta page").await?
                }
            };

            for entry in page.value {
                let Ok(id) = ItemId::new(entry.id) else {
                    warn!("dropping item delta entry with empty id");
                    continue;
                };

                if entry.removed.is_some() {
                    result.removed.push(id);
                } else {
                    result.added.push(id);
                }
            }

            if let Some(delta_link) = page.delta_link {
                result.delta = DeltaToken::new(delta_link).ok();
                break;
            }

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl ContainerClient for GraphMailboxClient {
    async fn get_container(
        &self,
        owner: &str,
        container_id: &ContainerId,
    ) -> Result<ContainerInfo, EngineError> {
        let path = self.container_path(owner, container_id.as_str());
        let raw: RawContainer = self.client.get_json(&path, "fetching container").await?;
        raw.into_container()
    }

    async fn list_containers(
        &self,
        owner: &str,
        _base_id: &ContainerId,
    ) -> Result<Vec<ContainerInfo>, EngineError> {
        // Folder categories enumerate the whole tree through the container
        // delta; calendars are flat and list directly.
        let start = match self.kind {
            MailboxKind::Events => format!("/users/{owner}/calendars"),
            _ => format!(
                "/users/{owner}/{}/delta",
                self.kind.container_segment()
            ),
        };

        let mut containers = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let page: RawCollectionPage<RawContainer> = match &next {
                Some(link) => self.client.get_json_url(link, "listing containers").await?,
                None => self.client.get_json(&start, "listing containers").await?,
            };

            for raw in page.value {
                match raw.into_container() {
                    Ok(c) => containers.push(c),
                    Err(e) => warn!(error = %e, "dropping malformed container"),
                }
            }

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        debug!(owner, count = containers.len(), "containers enumerated");
        Ok(containers)
    }
}

#[async_trait]
impl MailboxClient for GraphMailboxClient {
    async fn added_and_removed(
        &self,
        owner: &str,
        container_id: &ContainerId,
        token: Option<&DeltaToken>,
        cancel: &CancelToken,
    ) -> Result<AddedAndRemoved, EngineError> {
        match self.drain_item_delta(owner, container_id, token, cancel).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_resync_required() => {
                warn!(
                    container = container_id.as_str(),
                    "item delta token rejected, re-enumerating from scratch"
                );

                let mut result = self
                    .drain_item_delta(owner, container_id, None, cancel)
                    .await?;
                result.reset = true;
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    async fn item_payload(&self, owner: &str, item_id: &ItemId) -> Result<Vec<u8>, EngineError> {
        // Mail downloads the MIME body; contacts and events persist the
        // item's JSON representation.
        let path = match self.kind {
            MailboxKind::Mail => {
                format!("/users/{owner}/messages/{}/$value", item_id.as_str())
            }
            _ => format!(
                "/users/{owner}/{}/{}",
                self.kind.item_segment(),
                item_id.as_str()
            ),
        };

        self.client.get_bytes(&path, "fetching item payload").await
    }
}
