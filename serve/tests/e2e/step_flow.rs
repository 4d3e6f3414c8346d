//! The step loop over real HTTP: echo round-trip, tool confirmation with
//! auto-continuation, and interruption semantics.

use crate::common;
use weft::llm::MockScript;

async fn start_step(server: &common::TestServer, id: &str, session_id: &str) {
    let response = server
        .http
        .post(server.url(&format!("/api/v2/conversations/{id}/step")))
        .json(&serde_json::json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202, "step should be accepted");
}

#[tokio::test]
async fn echo_round_trip() {
    let server = common::spawn(vec![MockScript::text("Hi!")]).await;
    let created = common::create_conversation(&server, "abc").await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    common::post_user_message(&server, "abc", "hello").await;
    start_step(&server, "abc", &session_id).await;

    let frames = common::read_events_until(&server, "abc", &session_id, |v| {
        v["type"] == "generation_complete"
    })
    .await;

    // progress tokens concatenate to the final content
    let streamed: String = frames
        .iter()
        .filter(|f| f["type"] == "generation_progress")
        .map(|f| f["token"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(streamed, "Hi!");
    let complete = frames.last().unwrap();
    assert_eq!(complete["message"]["content"], "Hi!");

    // events carry monotonically increasing ids for replay
    let ids: Vec<u64> = frames
        .iter()
        .filter_map(|f| f["event_id"].as_u64())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let log = common::wait_for_log(&server, "abc", |log| log.len() == 3).await;
    let roles: Vec<&str> = log.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant"]);
}

#[tokio::test]
async fn tool_confirmation_flow() {
    let server = common::spawn(vec![
        MockScript::text("Listing:\n```shell\nls\n```\n"),
        MockScript::text("Done."),
    ])
    .await;
    let created = common::create_conversation(&server, "t1").await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    common::post_user_message(&server, "t1", "list files").await;
    start_step(&server, "t1", &session_id).await;

    // wait for the pending tool and confirm it
    let frames = common::read_events_until(&server, "t1", &session_id, |v| {
        v["type"] == "tool_pending"
    })
    .await;
    let pending = frames.last().unwrap();
    assert_eq!(pending["tooluse"]["tool"], "shell");
    assert_eq!(pending["tooluse"]["content"], "ls");
    assert_eq!(pending["auto_confirm"], false);
    let tool_id = pending["tool_id"].as_str().unwrap().to_string();

    let response = server
        .http
        .post(server.url("/api/v2/conversations/t1/tool/confirm"))
        .json(&serde_json::json!({
            "session_id": session_id,
            "tool_id": tool_id,
            "action": "confirm",
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // tool executes, output lands in the log, and a second step follows
    let frames = common::read_events_until(&server, "t1", &session_id, |v| {
        v["type"] == "generation_complete" && v["message"]["content"] == "Done."
    })
    .await;
    assert!(frames.iter().any(|f| f["type"] == "tool_executing"));
    assert!(frames.iter().any(|f| f["type"] == "message_added"));

    let log = common::wait_for_log(&server, "t1", |log| log.len() == 5).await;
    let roles: Vec<&str> = log.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "system", "assistant"]);
    assert!(log[3]["content"]
        .as_str()
        .unwrap()
        .contains("Ran command: `ls`"));
}

#[tokio::test]
async fn skip_keeps_conversation_flowing() {
    let server = common::spawn(vec![
        MockScript::text("```shell\nrm -rf /\n```\n"),
        MockScript::text("Understood, skipping."),
    ])
    .await;
    let created = common::create_conversation(&server, "sk").await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    common::post_user_message(&server, "sk", "dangerous").await;
    start_step(&server, "sk", &session_id).await;

    let frames = common::read_events_until(&server, "sk", &session_id, |v| {
        v["type"] == "tool_pending"
    })
    .await;
    let tool_id = frames.last().unwrap()["tool_id"].as_str().unwrap().to_string();

    server
        .http
        .post(server.url("/api/v2/conversations/sk/tool/confirm"))
        .json(&serde_json::json!({
            "session_id": session_id,
            "tool_id": tool_id,
            "action": "skip",
        }))
        .send()
        .await
        .unwrap();

    let log = common::wait_for_log(&server, "sk", |log| {
        log.iter()
            .any(|m| m["content"] == "Understood, skipping.")
    })
    .await;
    assert!(log.iter().any(|m| m["content"]
        .as_str()
        .map(|c| c.starts_with("Skipped tool "))
        .unwrap_or(false)));
}

#[tokio::test]
async fn interrupt_clears_pending_tools() {
    let server = common::spawn(vec![MockScript::text("```shell\nls\n```\n")]).await;
    let created = common::create_conversation(&server, "int").await;
    let session_id = created["session_id"].as_str().unwrap().to_string();

    common::post_user_message(&server, "int", "go").await;
    start_step(&server, "int", &session_id).await;
    common::read_events_until(&server, "int", &session_id, |v| v["type"] == "tool_pending")
        .await;

    let response = server
        .http
        .post(server.url("/api/v2/conversations/int/interrupt"))
        .json(&serde_json::json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    common::read_events_until(&server, "int", &session_id, |v| v["type"] == "interrupted")
        .await;

    // the cleared tool can no longer be confirmed
    let response = server
        .http
        .post(server.url("/api/v2/conversations/int/tool/confirm"))
        .json(&serde_json::json!({
            "session_id": session_id,
            "tool_id": "whatever",
            "action": "confirm",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn concurrent_step_returns_409() {
    let server = common::spawn(vec![MockScript::text("Hi!")]).await;
    let created = common::create_conversation(&server, "busy").await;
    let session_id = created["session_id"].as_str().unwrap().to_string();
    common::post_user_message(&server, "busy", "go").await;

    // Pin the conversation's generating flag as a running step would.
    let session = server.state.sessions.get(&session_id).unwrap();
    session
        .generating
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let response = server
        .http
        .post(server.url("/api/v2/conversations/busy/step"))
        .json(&serde_json::json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    session
        .generating
        .store(false, std::sync::atomic::Ordering::SeqCst);
    start_step(&server, "busy", &session_id).await;
    common::wait_for_log(&server, "busy", |log| log.len() == 3).await;
}
