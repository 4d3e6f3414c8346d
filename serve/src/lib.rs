//! HTTP/SSE server for Weft (axum).
//!
//! Exposes conversation CRUD, step invocation, tool confirmation,
//! interruption, and a server-sent-events stream under `/api/v2`.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`AppState`].

mod auth;
mod conversations;
mod error;
mod events;
mod session;
mod worker;

pub mod app;

pub use app::{AppState, ProviderFactory};
pub use auth::resolve_auth_token;
pub use session::{Session, SessionRegistry, SESSION_IDLE_TIMEOUT};

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub const DEFAULT_ADDR: &str = "127.0.0.1:5700";

/// Runs the server on an existing listener. Used by tests (bind to
/// 127.0.0.1:0 then pass the listener along with a prepared state).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("weft server listening on http://{}", addr);
    if state.auth_token.is_some() {
        info!("bearer-token auth enabled");
    }

    session::SessionRegistry::spawn_sweeper(state.sessions.clone(), state.logs_home.clone());

    let app = app::router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the server. Listens on `addr` (default 127.0.0.1:5700); auth is
/// resolved from the bind address and environment.
pub async fn run_serve(
    addr: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let state = Arc::new(
        AppState::new(weft::logs_home()).with_auth_token(auth::resolve_auth_token(&local)),
    );
    run_serve_on_listener(listener, state).await
}
