//! Auto-naming: new conversations get a short name from a cheap model.
//!
//! Best-effort and non-blocking: the step engine spawns this in the
//! background after the first assistant reply; failure just leaves the
//! conversation unnamed.

use std::path::PathBuf;
use std::sync::Arc;

use stream_event::SessionEvent;

use crate::events::EventSink;
use crate::llm::{ChatRequest, ProviderClient, ProviderError};
use crate::message::{Message, Role};
use crate::models::ModelMeta;

pub const MAX_NAME_LEN: usize = 50;

const NAME_PROMPT: &str = "Summarize this conversation opening as a short title, \
at most five words. Reply with the title only, no quotes or punctuation.";

/// Squeezes a model reply into a usable conversation name.
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '.' || c == '`')
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    if name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
        name = name.trim_end().to_string();
    }
    name
}

/// Asks the summary model for a name based on the opening turns.
pub async fn generate_name(
    client: &dyn ProviderClient,
    model: &ModelMeta,
    messages: &[Message],
) -> Result<String, ProviderError> {
    let opening: Vec<Message> = messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.hide)
        .take(4)
        .cloned()
        .collect();
    let mut prompt_messages = vec![Message::system(NAME_PROMPT)];
    prompt_messages.extend(opening);

    let req = ChatRequest {
        messages: prompt_messages,
        model: model.clone(),
        tools: vec![],
        output_schema: None,
    };
    let (text, _usage) = client.chat(&req).await?;
    let name = sanitize_name(&text);
    if name.is_empty() {
        return Err(ProviderError::Stream("empty name from model".to_string()));
    }
    Ok(name)
}

/// Fire-and-forget naming task: generates a name, saves it into the chat
/// config and announces a `config_changed` event.
pub fn spawn_auto_name(
    logdir: PathBuf,
    client: Arc<dyn ProviderClient>,
    model: ModelMeta,
    messages: Vec<Message>,
    events: EventSink,
) {
    tokio::spawn(async move {
        let name = match generate_name(client.as_ref(), &model, &messages).await {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!("auto-naming failed: {}", e);
                return;
            }
        };
        let mut config = match env_config::ChatConfig::load(&logdir) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("auto-naming: config load failed: {}", e);
                return;
            }
        };
        if config.name.is_some() {
            return; // user named it in the meantime; theirs wins
        }
        config.name = Some(name);
        if let Err(e) = config.save(&logdir) {
            tracing::debug!("auto-naming: config save failed: {}", e);
            return;
        }
        events.emit(SessionEvent::ConfigChanged {
            config: config.to_json(),
            changed_fields: vec!["name".to_string()],
        });
    });
}
