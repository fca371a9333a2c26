//! Aggregated `/v1/models`, the `/health` dump, and the raw `/metrics` map.

mod common;

use common::*;
use serde_json::{json, Value};
use wiremock::MockServer;

#[tokio::test]
async fn test_models_aggregation_dedupes_by_min_created_and_skips_cooldown() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let third = MockServer::start().await;
    mount_backend(&first, "m", 100, 0.0).await;
    mount_backend(&second, "m", 50, 0.0).await;
    mount_backend(&third, "m", 10, 0.0).await;

    let gw = spawn_gateway(
        &config_yaml(&[
            host_entry(&first.uri(), &["research"]),
            host_entry(&second.uri(), &["research"]),
            host_entry(&third.uri(), &["research"]),
        ]),
        SECRETS,
    )
    .await;

    // Put the third backend into cool-down; its created=10 must not appear.
    for _ in 0..3 {
        gw.state.health.record_failure(&third.uri());
    }

    let resp = reqwest::Client::new()
        .get(format!("{}/v1/models", gw.addr))
        .bearer_auth("tok-research")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({
            "object": "list",
            "data": [
                {"id": "m", "object": "model", "created": 50, "owned_by": "research"}
            ]
        })
    );
}

#[tokio::test]
async fn test_models_aggregation_respects_group_visibility() {
    let visible = MockServer::start().await;
    let hidden = MockServer::start().await;
    mount_backend(&visible, "m-visible", 100, 0.0).await;
    mount_backend(&hidden, "m-hidden", 100, 0.0).await;

    let gw = spawn_gateway(
        &config_yaml(&[
            host_entry(&visible.uri(), &["interns"]),
            host_entry(&hidden.uri(), &["research"]),
        ]),
        SECRETS,
    )
    .await;

    let body: Value = reqwest::Client::new()
        .get(format!("{}/v1/models", gw.addr))
        .bearer_auth("tok-intern")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "m-visible");
}

#[tokio::test]
async fn test_health_reports_cache_contents() {
    let backend = MockServer::start().await;
    mount_backend(&backend, "m", 100, 0.0).await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/v1/chat/completions"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({"id": "c"})))
        .mount(&backend)
        .await;

    let gw = spawn_gateway(
        &config_yaml(&[host_entry(&backend.uri(), &["research"])]),
        SECRETS,
    )
    .await;
    let client = reqwest::Client::new();

    // Before any probe both caches are empty.
    let body: Value = client
        .get(format!("{}/health", gw.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!({"servers": [{
            "url": backend.uri(),
            "healthy": true,
            "metrics_cached": null,
            "model_cached": null,
        }]})
    );

    // One dispatched request populates both caches.
    let resp = client
        .post(format!("{}/v1/chat/completions", gw.addr))
        .bearer_auth("tok-research")
        .json(&json!({"model": "m"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("{}/health", gw.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let server = &body["servers"][0];
    assert_eq!(server["healthy"], json!(true));
    assert_eq!(server["metrics_cached"], json!(0.0));
    assert_eq!(server["model_cached"]["id"], json!("m"));
    assert_eq!(server["model_cached"]["created"], json!(100));
}

#[tokio::test]
async fn test_metrics_dump_isolates_backend_failures() {
    let live = MockServer::start().await;
    mount_backend(&live, "m", 100, 2.0).await;

    // Reserve a port and release it so the second backend refuses connections.
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dead_uri = format!("http://127.0.0.1:{dead_port}");

    let gw = spawn_gateway(
        &config_yaml(&[
            host_entry(&live.uri(), &["research"]),
            host_entry(&dead_uri, &["research"]),
        ]),
        SECRETS,
    )
    .await;

    let body: Value = reqwest::Client::new()
        .get(format!("{}/metrics", gw.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body[live.uri()], json!(metrics_body(2.0, 0.0)));
    let dead_entry = body[&dead_uri].as_str().unwrap();
    assert!(
        dead_entry.starts_with("Error: "),
        "dead backend should map to an error string, got: {dead_entry}"
    );
}
