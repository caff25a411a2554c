//! Shared helpers for transport integration tests

use std::sync::Arc;
use std::time::Duration;

use graphvault_graph::GraphClient;
use wiremock::MockServer;

/// Start a mock server and a client pointed at it
pub async fn setup_graph_mock() -> (MockServer, Arc<GraphClient>) {
    let server = MockServer::start().await;
    let client = Arc::new(
        GraphClient::with_base_url("test-token", server.uri(), Duration::from_secs(5))
            .expect("building mock client"),
    );
    (server, client)
}

/// A delta page body with the given items and links
pub fn delta_page_body(
    items: serde_json::Value,
    next_link: Option<&str>,
    delta_link: Option<&str>,
) -> serde_json::Value {
    let mut body = serde_json::json!({ "value": items });
    if let Some(next) = next_link {
        body["@odata.nextLink"] = serde_json::json!(next);
    }
    if let Some(delta) = delta_link {
        body["@odata.deltaLink"] = serde_json::json!(delta);
    }
    body
}
