//! Axum app: shared state and router.

use axum::routing::{get, post, put};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;

use weft::{ProviderClient, ProviderError};

use crate::session::SessionRegistry;
use crate::{conversations, events, worker};

/// Builds a provider client for a resolved provider. Swappable so tests can
/// inject a scripted provider.
pub type ProviderFactory =
    Arc<dyn Fn(&weft::Provider) -> Result<Arc<dyn ProviderClient>, ProviderError> + Send + Sync>;

pub struct AppState {
    pub logs_home: PathBuf,
    pub sessions: Arc<SessionRegistry>,
    /// `None` disables auth (loopback default).
    pub auth_token: Option<String>,
    pub providers: ProviderFactory,
    pub tools: Arc<weft::ToolRegistry>,
}

impl AppState {
    pub fn new(logs_home: PathBuf) -> Self {
        Self {
            logs_home,
            sessions: Arc::new(SessionRegistry::new()),
            auth_token: None,
            providers: Arc::new(|provider| weft::client_for(provider)),
            tools: weft::tools::global(),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_providers(mut self, providers: ProviderFactory) -> Self {
        self.providers = providers;
        self
    }

    pub fn logdir(&self, conversation_id: &str) -> PathBuf {
        self.logs_home.join(conversation_id)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v2/conversations", get(conversations::list))
        .route(
            "/api/v2/conversations/:id",
            put(conversations::create)
                .get(conversations::read)
                .post(conversations::append)
                .delete(conversations::delete),
        )
        .route(
            "/api/v2/conversations/:id/config",
            get(conversations::get_config).patch(conversations::patch_config),
        )
        .route("/api/v2/conversations/:id/events", get(events::subscribe))
        .route("/api/v2/conversations/:id/step", post(worker::step))
        .route(
            "/api/v2/conversations/:id/tool/confirm",
            post(worker::confirm_tool),
        )
        .route(
            "/api/v2/conversations/:id/interrupt",
            post(worker::interrupt),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ))
        .with_state(state)
}
