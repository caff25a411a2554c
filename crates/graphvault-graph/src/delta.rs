//! Paginator / delta driver
//!
//! Wraps one delta endpoint as a lazy, restartable sequence of pages.
//! The sequence terminates when a page carries the terminal `deltaLink`;
//! a continuation `nextLink` keeps the machine in its paging state.
//!
//! ## States
//!
//! - `Start`: no request issued yet; holds the prior token, if any
//! - `Paging`: mid-enumeration, following continuation links
//! - `Done`: terminal page delivered; further polls return `None`
//!
//! A server-side token invalidation surfaces as
//! `EngineError::ResyncRequired` from [`GraphItemPager::next_page`];
//! the caller resets the pager and pulls again, now enumerating from
//! scratch. Prior tokens are full URLs, so resuming is just a GET against
//! the persisted link.

use std::sync::Arc;

use async_trait::async_trait;
use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::{DeltaToken, EngineError};
use graphvault_core::ports::transport::{DeltaPage, ItemPager};
use tracing::{debug, warn};

use crate::client::GraphClient;
use crate::models::RawDeltaPage;

enum PagerState {
    Start { token: Option<DeltaToken> },
    Paging { next_link: String },
    Done,
}

/// Delta pager over one endpoint
pub struct GraphItemPager {
    client: Arc<GraphClient>,
    /// Relative endpoint, e.g. `/drives/<id>/root/delta`
    endpoint: String,
    state: PagerState,
    pages_served: u32,
}

impl GraphItemPager {
    #[must_use]
    pub fn new(client: Arc<GraphClient>, endpoint: impl Into<String>, token: Option<DeltaToken>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            state: PagerState::Start { token },
            pages_served: 0,
        }
    }

    async fn fetch(&self, url_or_path: UrlOrPath<'_>) -> Result<RawDeltaPage, EngineError> {
        match url_or_path {
            UrlOrPath::Path(p) => self.client.get_json(p, "delta page").await,
            UrlOrPath::Url(u) => self.client.get_json_url(u, "delta page").await,
        }
    }
}

enum UrlOrPath<'a> {
    Path(&'a str),
    Url(&'a str),
}

#[async_trait]
impl ItemPager for GraphItemPager {
    async fn next_page(&mut self, cancel: &CancelToken) -> Result<Option<DeltaPage>, EngineError> {
        cancel.check()?;

        let raw = match &self.state {
            PagerState::Done => return Ok(None),

            PagerState::Start { token } => match token {
                // Persisted tokens are the full delta link from the prior
                // run; anything else is appended as a token parameter.
                Some(t) if t.as_str().starts_with("http") => {
                    self.fetch(UrlOrPath::Url(t.as_str())).await?
                }
                Some(t) => {
                    let path = format!("{}?token={}", self.endpoint, t.as_str());
                    self.fetch(UrlOrPath::Path(&path)).await?
                }
                None => self.fetch(UrlOrPath::Path(&self.endpoint.clone())).await?,
            },

            PagerState::Paging { next_link } => {
                self.fetch(UrlOrPath::Url(&next_link.clone())).await?
            }
        };

        let (page, item_errors) = raw.into_page();

        // Items without a usable id cannot flow downstream; they are logged
        // and dropped here, while structural validation (missing parents)
        // stays with the reconciler.
        for err in item_errors {
            warn!(error = %err, "dropping malformed delta entry");
        }

        self.pages_served += 1;

        self.state = match (&page.next_link, &page.delta_link) {
            (Some(next), _) => PagerState::Paging {
                next_link: next.clone(),
            },
            (None, _) => PagerState::Done,
        };

        debug!(
            page = self.pages_served,
            items = page.items.len(),
            has_next = page.next_link.is_some(),
            has_delta = page.delta_link.is_some(),
            "delta page received"
        );

        Ok(Some(page))
    }

    fn reset(&mut self) {
        debug!(endpoint = %self.endpoint, "pager reset, discarding token");
        self.state = PagerState::Start { token: None };
    }
}

/// Build the delta endpoint for a drive
#[must_use]
pub fn drive_delta_endpoint(drive_id: &str) -> String {
    format!("/drives/{drive_id}/root/delta")
}
