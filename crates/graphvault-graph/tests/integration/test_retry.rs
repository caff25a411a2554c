//! Retry and error-classification behavior of the client

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn transient_5xx_is_retried_until_success() {
    let (server, client) = common::setup_graph_mock().await;

    // Two failures, then success.
    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": [] })),
        )
        .mount(&server)
        .await;

    let body: Value = client
        .get_json("/users/u/drives", "listing drives")
        .await
        .expect("retries should recover");

    assert_eq!(body["value"], serde_json::json!([]));
}

#[tokio::test]
async fn rate_limit_honors_retry_after() {
    let (server, client) = common::setup_graph_mock().await;

    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": [] })),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let body: Value = client
        .get_json("/users/u/drives", "listing drives")
        .await
        .expect("429 should be retried");

    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    assert_eq!(body["value"], serde_json::json!([]));
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let (server, client) = common::setup_graph_mock().await;

    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .get_json::<Value>("/users/u/drives", "listing drives")
        .await
        .unwrap_err();

    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn client_errors_surface_without_retry() {
    let (server, client) = common::setup_graph_mock().await;

    Mock::given(method("GET"))
        .and(path("/users/u/drives"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .get_json::<Value>("/users/u/drives", "listing drives")
        .await
        .unwrap_err();

    assert!(!err.is_transient());
    assert!(!err.is_auth_expired());
}
