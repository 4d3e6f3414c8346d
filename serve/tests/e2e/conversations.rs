//! Conversation CRUD over real HTTP.

use crate::common;
use weft::llm::MockScript;

#[tokio::test]
async fn create_read_append_delete() {
    let server = common::spawn(vec![MockScript::text("unused")]).await;

    let created = common::create_conversation(&server, "abc").await;
    assert_eq!(created["conversation_id"], "abc");
    assert!(created["session_id"].as_str().is_some());

    // the log opens with a synthesized system prompt
    let log = common::get_log(&server, "abc").await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["role"], "system");

    common::post_user_message(&server, "abc", "hello").await;
    let log = common::get_log(&server, "abc").await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1]["content"], "hello");

    // listing sees it
    let listing: serde_json::Value = server
        .http
        .get(server.url("/api/v2/conversations?limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conversations = listing["conversations"].as_array().unwrap();
    assert!(conversations.iter().any(|c| c["id"] == "abc"));

    // delete, then reads 404
    let response = server
        .http
        .delete(server.url("/api/v2/conversations/abc"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let response = server
        .http
        .get(server.url("/api/v2/conversations/abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn create_existing_returns_409_without_touching_log() {
    let server = common::spawn(vec![MockScript::text("unused")]).await;
    common::create_conversation(&server, "dup").await;
    common::post_user_message(&server, "dup", "original").await;

    let response = server
        .http
        .put(server.url("/api/v2/conversations/dup"))
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "overwrite"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let log = common::get_log(&server, "dup").await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1]["content"], "original");
}

#[tokio::test]
async fn unknown_conversation_is_404() {
    let server = common::spawn(vec![]).await;
    let response = server
        .http
        .get(server.url("/api/v2/conversations/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .http
        .get(server.url("/api/v2/conversations/nope/config"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn config_patch_reports_changes_and_persists() {
    let server = common::spawn(vec![MockScript::text("unused")]).await;
    common::create_conversation(&server, "cfg").await;

    let config: serde_json::Value = server
        .http
        .get(server.url("/api/v2/conversations/cfg/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["name"], "e2e test");
    assert_eq!(config["tool_format"], "markdown");

    let patched: serde_json::Value = server
        .http
        .patch(server.url("/api/v2/conversations/cfg/config"))
        .json(&serde_json::json!({"name": "renamed", "tool_format": "xml"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["name"], "renamed");
    assert_eq!(patched["tool_format"], "xml");

    let config: serde_json::Value = server
        .http
        .get(server.url("/api/v2/conversations/cfg/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["name"], "renamed");
}
