//! Step invocation, tool confirmation, and interruption.
//!
//! A step runs in a background task; the `generating` flag (shared by all
//! sessions of a conversation) serializes steps, so a second `step` POST
//! while one runs returns 409. Tool execution continues the loop so the
//! conversation keeps flowing after a confirmed tool.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stream_event::SessionEvent;
use weft::{
    default_model_from_env, split_model_string, ConversationLog, LogOptions, RetryPolicy,
    StepConfig, StepContext,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::session::Session;

#[derive(Deserialize, Default)]
pub struct StepRequest {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub auto_confirm: bool,
}

fn resolve_session(
    state: &Arc<AppState>,
    conversation_id: &str,
    session_id: &Option<String>,
) -> Result<Arc<Session>, ApiError> {
    match session_id {
        Some(id) => state
            .sessions
            .get(id)
            .filter(|s| s.conversation_id == conversation_id)
            .ok_or_else(|| ApiError::NotFound(format!("session {id}"))),
        None => Ok(state.sessions.create(conversation_id)),
    }
}

/// Builds a step context bound to one session.
fn build_context(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    chat: &config::ChatConfig,
    model: &str,
) -> Result<StepContext, ApiError> {
    let (provider, _) = split_model_string(model);
    let client = (state.providers)(&provider).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let tools = match &chat.tools {
        Some(allow) => Arc::new(state.tools.scoped(allow)),
        None => state.tools.clone(),
    };
    Ok(StepContext {
        conversation_id: session.conversation_id.clone(),
        events: session.sink(),
        generating: session.generating.clone(),
        interrupt: session.interrupt.clone(),
        pending_tools: session.pending_tools.clone(),
        auto_confirm_count: session.auto_confirm_count.clone(),
        costs: session.costs.clone(),
        hooks: session.hooks.clone(),
        client: client.clone(),
        summary_client: Some(client),
        tools,
        retry: RetryPolicy::default(),
    })
}

struct StepSetup {
    ctx: StepContext,
    cfg: StepConfig,
    branch: Option<String>,
}

fn prepare_step(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    model_override: Option<String>,
    branch: Option<String>,
    auto_confirm: bool,
) -> Result<StepSetup, ApiError> {
    let logdir = state.logdir(&session.conversation_id);
    if !logdir.exists() {
        return Err(ApiError::NotFound(format!(
            "conversation {}",
            session.conversation_id
        )));
    }
    let chat = config::ChatConfig::load(&logdir)?;
    let model = model_override
        .or_else(|| chat.model.clone())
        .or_else(default_model_from_env)
        .ok_or_else(|| {
            ApiError::BadRequest("no model configured and no provider API key set".to_string())
        })?;
    let ctx = build_context(state, session, &chat, &model)?;
    let mut cfg = StepConfig::from_chat_config(&chat, &model);
    cfg.model = model;
    cfg.auto_confirm = auto_confirm;
    Ok(StepSetup { ctx, cfg, branch })
}

fn open_log(state: &Arc<AppState>, setup: &StepSetup, conversation_id: &str) -> Result<ConversationLog, ApiError> {
    Ok(ConversationLog::open(
        state.logdir(conversation_id),
        LogOptions {
            branch: setup.branch.clone(),
            ..LogOptions::default()
        },
    )?)
}

/// POST /conversations/{id}/step: trigger one step via a background worker.
pub async fn step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<StepRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = resolve_session(&state, &id, &body.session_id)?;
    if session.generating.load(Ordering::SeqCst) {
        return Err(ApiError::Conflict("generation already in progress".to_string()));
    }

    let setup = prepare_step(&state, &session, body.model, body.branch, body.auto_confirm)?;
    session.interrupt.clear();
    let session_id = session.id.clone();
    let conversation_id = id.clone();
    let state2 = state.clone();
    let events = session.sink();
    tokio::spawn(async move {
        let mut log = match open_log(&state2, &setup, &conversation_id) {
            Ok(log) => log,
            Err(e) => {
                events.emit(SessionEvent::Error {
                    error: format!("{e:?}"),
                });
                return;
            }
        };
        if let Err(e) = weft::run_step_loop(&mut log, &setup.ctx, &setup.cfg).await {
            events.emit(SessionEvent::Error {
                error: e.to_string(),
            });
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "started", "session_id": session_id})),
    ))
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub tool_id: String,
    pub action: String,
    pub content: Option<String>,
    pub count: Option<i64>,
}

/// POST /conversations/{id}/tool/confirm: resolve a pending tool.
pub async fn confirm_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .sessions
        .get(&body.session_id)
        .filter(|s| s.conversation_id == id)
        .ok_or_else(|| ApiError::NotFound(format!("session {}", body.session_id)))?;
    if !session.pending_tools.contains_key(&body.tool_id) {
        return Err(ApiError::NotFound(format!("no pending tool {}", body.tool_id)));
    }

    let setup = prepare_step(&state, &session, None, None, false)?;
    let mut log = open_log(&state, &setup, &id)?;

    match body.action.as_str() {
        "confirm" => {}
        "edit" => {
            let content = body
                .content
                .ok_or_else(|| ApiError::BadRequest("edit requires content".to_string()))?;
            weft::edit_tool(&mut log, &setup.ctx, &body.tool_id, content)?;
        }
        "skip" => {
            weft::skip_tool(&mut log, &setup.ctx, &body.tool_id)?;
            drop(log);
            spawn_continuation(state, setup, id, None);
            return Ok(Json(json!({"status": "skipped"})));
        }
        "auto" => {
            let count = body.count.unwrap_or(1).max(1);
            session.auto_confirm_count.store(count, Ordering::SeqCst);
        }
        other => {
            return Err(ApiError::BadRequest(format!("unknown action {other}")));
        }
    }

    drop(log);
    spawn_continuation(state, setup, id, Some(body.tool_id));
    Ok(Json(json!({"status": "executing"})))
}

/// Executes a confirmed tool (when given) and keeps stepping afterwards.
fn spawn_continuation(
    state: Arc<AppState>,
    setup: StepSetup,
    conversation_id: String,
    tool_id: Option<String>,
) {
    let events = setup.ctx.events.clone();
    tokio::spawn(async move {
        let mut log = match open_log(&state, &setup, &conversation_id) {
            Ok(log) => log,
            Err(e) => {
                events.emit(SessionEvent::Error {
                    error: format!("{e:?}"),
                });
                return;
            }
        };
        if let Some(tool_id) = tool_id {
            if let Err(e) = weft::execute_tool(&mut log, &setup.ctx, &setup.cfg, &tool_id).await {
                events.emit(SessionEvent::Error {
                    error: e.to_string(),
                });
                return;
            }
        }
        if let Err(e) = weft::run_step_loop(&mut log, &setup.ctx, &setup.cfg).await {
            events.emit(SessionEvent::Error {
                error: e.to_string(),
            });
        }
    });
}

#[derive(Deserialize, Default)]
pub struct InterruptRequest {
    pub session_id: Option<String>,
}

/// POST /conversations/{id}/interrupt: stop generation, clear pending tools.
pub async fn interrupt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<InterruptRequest>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let sessions = match &body.session_id {
        Some(session_id) => vec![state
            .sessions
            .get(session_id)
            .filter(|s| s.conversation_id == id)
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?],
        None => state.sessions.for_conversation(&id),
    };
    if sessions.is_empty() {
        return Err(ApiError::NotFound(format!("no sessions for {id}")));
    }

    for session in sessions {
        let was_generating = session.generating.swap(false, Ordering::SeqCst);
        session.interrupt.set();
        session.pending_tools.clear();
        if !was_generating {
            // The engine emits `interrupted` itself when caught mid-stream.
            session.push_event(SessionEvent::Interrupted);
        }
    }
    Ok(Json(json!({"status": "interrupted"})))
}
