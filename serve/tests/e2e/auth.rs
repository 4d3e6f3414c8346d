//! Bearer-token auth over real HTTP.

use crate::common;
use weft::llm::MockScript;

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let server =
        common::spawn_with_auth(vec![MockScript::text("hi")], Some("secret-token".into())).await;

    let response = server
        .http
        .get(server.url("/api/v2/conversations?limit=5"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .http
        .get(server.url("/api/v2/conversations?limit=5"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .http
        .get(server.url("/api/v2/conversations?limit=5"))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn events_accept_query_token() {
    let server =
        common::spawn_with_auth(vec![MockScript::text("hi")], Some("secret-token".into())).await;

    // create over the authed surface
    let response = server
        .http
        .put(server.url("/api/v2/conversations/authconv"))
        .bearer_auth("secret-token")
        .json(&serde_json::json!({"config": {"name": "t", "model": "local/test"}}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap();

    // query token works on the SSE endpoint only
    let response = server
        .http
        .get(server.url(&format!(
            "/api/v2/conversations/authconv/events?session_id={session_id}&token=secret-token"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // and does not leak onto other endpoints
    let response = server
        .http
        .get(server.url("/api/v2/conversations/authconv?token=secret-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
