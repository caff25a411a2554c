//! Delta pager behavior against a mock server
//!
//! - Single-page enumeration ending in a deltaLink
//! - Multi-page enumeration following nextLinks
//! - Token invalidation (410) surfacing as a resync, then recovery after
//!   a reset
//! - Persisted tokens being full URLs

use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::{DeltaToken, ItemKind};
use graphvault_core::ports::transport::ItemPager;
use graphvault_graph::GraphItemPager;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn single_page_ends_with_delta_link() {
    let (server, client) = common::setup_graph_mock().await;

    let items = serde_json::json!([
        {
            "id": "root-1",
            "name": "root",
            "root": {},
            "folder": {}
        },
        {
            "id": "file-1",
            "name": "notes.txt",
            "size": 64,
            "lastModifiedDateTime": "2026-07-01T08:00:00Z",
            "parentReference": { "id": "root-1", "path": "/drives/d1/root:" },
            "file": {}
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::delta_page_body(
            items,
            None,
            Some("https://example.com/delta?token=t1"),
        )))
        .mount(&server)
        .await;

    let mut pager = GraphItemPager::new(client, "/drives/d1/root/delta", None);
    let cancel = CancelToken::new();

    let page = pager.next_page(&cancel).await.unwrap().unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].kind, ItemKind::Root);
    assert_eq!(page.items[1].kind, ItemKind::File);
    assert_eq!(
        page.delta_link.as_deref(),
        Some("https://example.com/delta?token=t1")
    );

    // Terminal page delivered; the pager is done.
    assert!(pager.next_page(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn pagination_follows_next_links() {
    let (server, client) = common::setup_graph_mock().await;

    let page2_url = format!("{}/drives/d1/root/delta", server.uri());

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .and(query_param("$skiptoken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::delta_page_body(
            serde_json::json!([{ "id": "b", "name": "b.txt", "file": {} }]),
            None,
            Some("https://example.com/delta?token=final"),
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::delta_page_body(
            serde_json::json!([{ "id": "a", "name": "a.txt", "file": {} }]),
            Some(&format!("{page2_url}?$skiptoken=page2")),
            None,
        )))
        .mount(&server)
        .await;

    let mut pager = GraphItemPager::new(client, "/drives/d1/root/delta", None);
    let cancel = CancelToken::new();

    let first = pager.next_page(&cancel).await.unwrap().unwrap();
    assert_eq!(first.items[0].id.as_str(), "a");
    assert!(first.next_link.is_some());

    let second = pager.next_page(&cancel).await.unwrap().unwrap();
    assert_eq!(second.items[0].id.as_str(), "b");
    assert!(second.delta_link.is_some());

    assert!(pager.next_page(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn gone_surfaces_resync_and_reset_recovers() {
    let server = MockServer::start().await;
    let client = std::sync::Arc::new(
        graphvault_graph::GraphClient::with_base_url(
            "tok",
            server.uri(),
            std::time::Duration::from_secs(5),
        )
        .unwrap(),
    );

    // With the stale token: 410.
    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .and(query_param("token", "stale"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    // From scratch: a full page.
    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::delta_page_body(
            serde_json::json!([{ "id": "fresh", "name": "fresh.txt", "file": {} }]),
            None,
            Some("https://example.com/delta?token=rebuilt"),
        )))
        .mount(&server)
        .await;

    let token = DeltaToken::new("stale").unwrap();
    let mut pager = GraphItemPager::new(client, "/drives/d1/root/delta", Some(token));
    let cancel = CancelToken::new();

    let err = pager.next_page(&cancel).await.unwrap_err();
    assert!(err.is_resync_required());

    pager.reset();

    let page = pager.next_page(&cancel).await.unwrap().unwrap();
    assert_eq!(page.items[0].id.as_str(), "fresh");
    assert!(page.delta_link.is_some());
}

#[tokio::test]
async fn url_shaped_token_is_followed_directly() {
    let (server, client) = common::setup_graph_mock().await;

    Mock::given(method("GET"))
        .and(path("/drives/d1/root/delta"))
        .and(query_param("token", "prior"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::delta_page_body(
            serde_json::json!([]),
            None,
            Some("https://example.com/delta?token=next"),
        )))
        .mount(&server)
        .await;

    // The persisted token is the full delta link from the previous run.
    let token =
        DeltaToken::new(format!("{}/drives/d1/root/delta?token=prior", server.uri())).unwrap();
    let mut pager = GraphItemPager::new(client, "/drives/d1/root/delta", Some(token));

    let page = pager
        .next_page(&CancelToken::new())
        .await
        .unwrap()
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(
        page.delta_link.as_deref(),
        Some("https://example.com/delta?token=next")
    );
}

#[tokio::test]
async fn cancellation_stops_paging() {
    let (_server, client) = common::setup_graph_mock().await;

    let mut pager = GraphItemPager::new(client, "/drives/d1/root/delta", None);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = pager.next_page(&cancel).await.unwrap_err();
    assert_eq!(err, graphvault_core::domain::EngineError::Cancelled);
}
