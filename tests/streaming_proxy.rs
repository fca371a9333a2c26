//! Streaming relay over the wire: pass-through of SSE bytes and buffering of
//! upstream error responses.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
data: [DONE]\n\n";

#[tokio::test]
async fn test_streaming_response_passes_through() {
    let backend = MockServer::start().await;
    mount_backend(&backend, "m", 100, 0.0).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SSE_BODY.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&backend)
        .await;

    let gw = spawn_gateway(
        &config_yaml(&[host_entry(&backend.uri(), &["research"])]),
        SECRETS,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gw.addr))
        .bearer_auth("tok-research")
        .json(&json!({"model": "m", "stream": true}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert!(resp.headers().get("content-length").is_none());
    assert_eq!(resp.text().await.unwrap(), SSE_BODY);
}

#[tokio::test]
async fn test_streaming_upstream_error_is_returned_buffered() {
    let backend = MockServer::start().await;
    mount_backend(&backend, "m", 100, 0.0).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"error": "overloaded"})),
        )
        .mount(&backend)
        .await;

    let gw = spawn_gateway(
        &config_yaml(&[host_entry(&backend.uri(), &["research"])]),
        SECRETS,
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gw.addr))
        .bearer_auth("tok-research")
        .json(&json!({"model": "m", "stream": true}))
        .send()
        .await
        .unwrap();

    // An upstream error never streams: full status and body come back whole.
    assert_eq!(resp.status(), 429);
    assert_eq!(
        resp.json::<serde_json::Value>().await.unwrap(),
        json!({"error": "overloaded"})
    );
}
