//! Conversation CRUD and chat-config endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use stream_event::SessionEvent;
use weft::{
    assemble_system_prompt, ConversationLog, FileRef, LogOptions, Message, ProjectConfig, Role,
    UserConfig,
};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let conversations = weft::list_conversations(&state.logs_home, query.limit)?;
    Ok(Json(json!({ "conversations": conversations })))
}

#[derive(Deserialize, Default)]
pub struct CreateRequest {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
}

#[derive(Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl IncomingMessage {
    fn into_message(self) -> Result<Message, ApiError> {
        let role = match self.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => return Err(ApiError::BadRequest(format!("unknown role {other}"))),
        };
        Ok(Message::new(role, self.content)
            .with_files(self.files.iter().map(|f| FileRef::parse(f)).collect()))
    }
}

/// Creates a conversation with its initial config and messages.
/// Idempotence rule: an existing id returns 409 without touching the log.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let logdir = state.logdir(&id);
    if logdir.exists() {
        return Err(ApiError::Conflict(format!("conversation {id} exists")));
    }

    let mut log = ConversationLog::open(
        &logdir,
        LogOptions {
            create: true,
            ..LogOptions::default()
        },
    )?;

    let mut chat = config::ChatConfig::new();
    if let Some(patch) = &body.config {
        chat.apply_patch(patch);
    }
    chat.save(&logdir)?;

    // The log always opens with a system message; synthesize one when the
    // client did not provide it.
    let needs_system = !body
        .messages
        .first()
        .map(|m| m.role == "system")
        .unwrap_or(false);
    if needs_system {
        log.append(Message::system(system_prompt_for(&state, &chat)))?;
    }
    for incoming in body.messages {
        log.append(incoming.into_message()?)?;
    }

    let session = state.sessions.create(&id);
    Ok((
        StatusCode::OK,
        Json(json!({"conversation_id": id, "session_id": session.id})),
    ))
}

fn system_prompt_for(state: &AppState, chat: &config::ChatConfig) -> String {
    let project = chat
        .workspace
        .as_deref()
        .and_then(|w| ProjectConfig::load(w).ok().flatten());
    let user = UserConfig::load("weft").ok();
    let scoped;
    let tools = match &chat.tools {
        Some(allow) => {
            scoped = state.tools.scoped(allow);
            &scoped
        }
        None => state.tools.as_ref(),
    };
    assemble_system_prompt(project.as_ref(), user.as_ref(), tools)
}

#[derive(Deserialize, Default)]
pub struct ReadQuery {
    #[serde(default)]
    pub branch: Option<String>,
}

pub async fn read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<Value>, ApiError> {
    let log = ConversationLog::open(
        state.logdir(&id),
        LogOptions {
            branch: query.branch,
            ..LogOptions::default()
        },
    )?;
    Ok(Json(json!({
        "id": id,
        "log": log.messages(),
        "branches": log.branches(),
    })))
}

/// Appends one message (no generation). Emits `message_added` to sessions.
pub async fn append(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<IncomingMessage>,
) -> Result<Json<Value>, ApiError> {
    let branch = body.branch.clone();
    let message = body.into_message()?;
    let mut log = ConversationLog::open(
        state.logdir(&id),
        LogOptions {
            branch,
            ..LogOptions::default()
        },
    )?;
    log.append(message.clone())?;
    state.sessions.broadcast(
        &id,
        &SessionEvent::MessageAdded {
            message: serde_json::to_value(&message).unwrap_or(Value::Null),
        },
    );
    Ok(Json(json!({"status": "ok"})))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let logdir = state.logdir(&id);
    if !logdir.exists() {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }
    state.sessions.remove_for_conversation(&id, &logdir).await;
    std::fs::remove_dir_all(&logdir).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"status": "deleted"})))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let logdir = state.logdir(&id);
    if !logdir.exists() {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }
    let chat = config::ChatConfig::load(&logdir)?;
    Ok(Json(chat.to_json()))
}

/// Updates the chat config, regenerates the leading system prompt, and
/// announces `config_changed`.
pub async fn patch_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let logdir = state.logdir(&id);
    if !logdir.exists() {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }
    let mut chat = config::ChatConfig::load(&logdir)?;
    let changed = chat.apply_patch(&patch);
    if changed.is_empty() {
        return Ok(Json(chat.to_json()));
    }
    chat.save(&logdir)?;

    // Tool or model changes invalidate the leading system prompt.
    let mut log = ConversationLog::open(&logdir, LogOptions::default())?;
    if log.messages().first().map(|m| m.role) == Some(Role::System) {
        log.replace(0, Message::system(system_prompt_for(&state, &chat)))?;
    }

    state.sessions.broadcast(
        &id,
        &SessionEvent::ConfigChanged {
            config: chat.to_json(),
            changed_fields: changed,
        },
    );
    Ok(Json(chat.to_json()))
}
