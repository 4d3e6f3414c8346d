//! Shared e2e harness: a real listener on 127.0.0.1:0 with a scripted
//! provider injected through the provider factory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::net::TcpListener;

use serve::{AppState, ProviderFactory};
use weft::llm::{MockProvider, MockScript};
use weft::ProviderClient;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base: String,
    pub http: reqwest::Client,
    pub state: Arc<AppState>,
    // kept alive for the duration of the test
    _logs: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Spawns a server whose provider replays the given scripts.
pub async fn spawn(scripts: Vec<MockScript>) -> TestServer {
    spawn_with_auth(scripts, None).await
}

pub async fn spawn_with_auth(scripts: Vec<MockScript>, token: Option<String>) -> TestServer {
    let logs = tempfile::tempdir().expect("tempdir");
    let provider: Arc<MockProvider> = Arc::new(MockProvider::new(scripts));
    let factory: ProviderFactory = Arc::new(move |_| Ok(provider.clone() as Arc<dyn ProviderClient>));

    let state = Arc::new(
        AppState::new(logs.path().to_path_buf())
            .with_providers(factory)
            .with_auth_token(token),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve::run_serve_on_listener(listener, state.clone()));

    TestServer {
        addr,
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        state,
        _logs: logs,
    }
}

/// Creates a conversation with a named chat config (so background
/// auto-naming stays quiet) and the mock model preconfigured.
pub async fn create_conversation(server: &TestServer, id: &str) -> Value {
    let response = server
        .http
        .put(server.url(&format!("/api/v2/conversations/{id}")))
        .json(&serde_json::json!({
            "config": {"name": "e2e test", "model": "local/test"},
        }))
        .send()
        .await
        .expect("create request");
    assert!(
        response.status().is_success(),
        "create failed: {}",
        response.status()
    );
    response.json().await.expect("create body")
}

pub async fn post_user_message(server: &TestServer, id: &str, content: &str) {
    let response = server
        .http
        .post(server.url(&format!("/api/v2/conversations/{id}")))
        .json(&serde_json::json!({"role": "user", "content": content}))
        .send()
        .await
        .expect("append request");
    assert!(response.status().is_success());
}

pub async fn get_log(server: &TestServer, id: &str) -> Vec<Value> {
    let response = server
        .http
        .get(server.url(&format!("/api/v2/conversations/{id}")))
        .send()
        .await
        .expect("read request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("read body");
    body["log"].as_array().cloned().unwrap_or_default()
}

/// Polls the log until `predicate` holds or the timeout expires.
pub async fn wait_for_log<F>(server: &TestServer, id: &str, predicate: F) -> Vec<Value>
where
    F: Fn(&[Value]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let log = get_log(server, id).await;
        if predicate(&log) {
            return log;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for log condition; log: {log:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Reads the SSE stream until an event matches, returning every data frame
/// seen along the way.
pub async fn read_events_until<F>(
    server: &TestServer,
    id: &str,
    session_id: &str,
    predicate: F,
) -> Vec<Value>
where
    F: Fn(&Value) -> bool,
{
    use futures_util::StreamExt;

    let response = server
        .http
        .get(server.url(&format!(
            "/api/v2/conversations/{id}/events?session_id={session_id}"
        )))
        .send()
        .await
        .expect("events request");
    assert!(response.status().is_success());

    let mut frames = Vec::new();
    let mut buffer = String::new();
    let mut stream = response.bytes_stream();
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled");
        let Some(chunk) = chunk else { break };
        buffer.push_str(&String::from_utf8_lossy(&chunk.expect("chunk")));

        while let Some(pos) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..pos + 2).collect();
            for line in frame.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(value) = serde_json::from_str::<Value>(data) {
                        let done = predicate(&value);
                        frames.push(value);
                        if done {
                            return frames;
                        }
                    }
                }
            }
        }
    }
    panic!("event stream ended before the expected event; saw: {frames:?}");
}
