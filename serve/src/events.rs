//! SSE event stream: replay + live tail of a session's event log.
//!
//! A client that reconnects with the same `session_id` (optionally `from` the
//! last event id it saw) replays everything it missed; the session retains
//! its event log until idle-expiry. Keepalive pings go out as real data
//! frames (`{"type":"ping"}`) roughly every 15 seconds.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::app::AppState;
use crate::error::ApiError;
use crate::session::Session;

const PING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    pub session_id: Option<String>,
    /// Replay events with id greater than this (0 = everything).
    #[serde(default)]
    pub from: u64,
    /// Accepted by the auth layer; unused here.
    #[allow(dead_code)]
    pub token: Option<String>,
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    if !state.logdir(&id).exists() {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }
    let session = match &query.session_id {
        Some(session_id) => state
            .sessions
            .get(session_id)
            .filter(|s| s.conversation_id == id)
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?,
        None => state.sessions.create(&id),
    };

    let client_id = uuid::Uuid::new_v4().to_string();
    session.add_client(&client_id);

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(pump_events(session, client_id, query.from, tx));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new()))
}

async fn pump_events(
    session: Arc<Session>,
    client_id: String,
    from: u64,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    // Sent once on subscribe, outside the replayable envelope sequence.
    let connected = serde_json::json!({
        "type": "connected",
        "session_id": session.id,
    });
    if send_frame(&tx, &connected).await.is_err() {
        session.remove_client(&client_id);
        return;
    }

    let mut cursor = from;
    loop {
        // Register interest before scanning so events landing mid-scan wake us.
        let mut notified = std::pin::pin!(session.event_signal().notified());
        notified.as_mut().enable();

        for frame in session.events_since(cursor) {
            if let Some(event_id) = frame.get("event_id").and_then(Value::as_u64) {
                cursor = cursor.max(event_id);
            }
            if send_frame(&tx, &frame).await.is_err() {
                session.remove_client(&client_id);
                return;
            }
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(PING_INTERVAL) => {
                let ping = serde_json::json!({"type": "ping"});
                if send_frame(&tx, &ping).await.is_err() {
                    session.remove_client(&client_id);
                    return;
                }
            }
        }
    }
}

async fn send_frame(
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    frame: &Value,
) -> Result<(), ()> {
    let event = Event::default().data(frame.to_string());
    tx.send(Ok(event)).await.map_err(|_| ())
}
