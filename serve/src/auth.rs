//! Bearer-token auth.
//!
//! Auth is enabled automatically when binding to a non-loopback address,
//! disabled on loopback for convenience, and `WEFT_DISABLE_AUTH=true`
//! force-disables it. The SSE endpoint also accepts `?token=` because
//! EventSource clients cannot set headers (noted as less secure).

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::app::AppState;
use crate::error::ApiError;

/// Resolves the effective server token for a bind address.
pub fn resolve_auth_token(addr: &SocketAddr) -> Option<String> {
    if matches!(
        std::env::var("WEFT_DISABLE_AUTH").as_deref(),
        Ok("true") | Ok("1")
    ) {
        return None;
    }
    if let Ok(token) = std::env::var("WEFT_SERVER_TOKEN") {
        if !token.is_empty() {
            return Some(token);
        }
    }
    if addr.ip().is_loopback() {
        return None;
    }
    let token = uuid::Uuid::new_v4().to_string();
    tracing::warn!(
        "binding to non-loopback {} with no WEFT_SERVER_TOKEN; generated token: {}",
        addr,
        token
    );
    Some(token)
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth_token else {
        return next.run(request).await;
    };

    let header_ok = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {expected}"))
        .unwrap_or(false);

    // EventSource cannot set headers; allow ?token= on the events route only.
    let query_ok = request.uri().path().ends_with("/events")
        && request
            .uri()
            .query()
            .map(|q| {
                q.split('&')
                    .any(|pair| pair.strip_prefix("token=") == Some(expected.as_str()))
            })
            .unwrap_or(false);

    if header_ok || query_ok {
        next.run(request).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}
