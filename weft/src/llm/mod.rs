//! Provider adapters: one uniform chat/stream interface over heterogeneous
//! LLM wire protocols.
//!
//! Two adapter families cover all supported backends: [`OpenAiFamily`] for
//! OpenAI, Azure, OpenRouter, Gemini (OpenAI mode), Groq, xAI, DeepSeek,
//! Nvidia, local servers and user-configured endpoints; [`AnthropicFamily`]
//! for the native Anthropic messages API with prompt caching and thinking.
//!
//! # Streaming contract
//!
//! `stream()` sends opaque UTF-8 fragments into the given channel and returns
//! the usage record when the stream finishes. Native tool-call fragments are
//! flattened into the text stream behind a `\n@<name>(<call_id>): ` marker;
//! reasoning fragments are bracketed by `<think>` / `</think>` sentinels, so
//! the tool parser never has to care which wire protocol produced the text.

mod anthropic;
mod cache;
mod mock;
mod openai;
pub mod retry;

pub use anthropic::AnthropicFamily;
pub use cache::{default_cache_strategy, CacheStrategy, FourBreakpointStrategy};
pub use mock::{MockProvider, MockScript};
pub use openai::OpenAiFamily;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::models::{ModelMeta, Provider};
use crate::tools::ToolSpec;

/// Marker used to flatten native tool calls into the text stream.
pub fn tool_call_marker(name: &str, call_id: &str) -> String {
    format!("\n@{name}({call_id}): ")
}

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Splits `<think>…</think>` content out of a string. Returns (rest, reasoning).
pub fn extract_think(content: &str) -> (String, Option<String>) {
    let Some(start) = content.find(THINK_OPEN) else {
        return (content.to_string(), None);
    };
    let Some(end_rel) = content[start..].find(THINK_CLOSE) else {
        return (content.to_string(), None);
    };
    let end = start + end_rel;
    let reasoning = content[start + THINK_OPEN.len()..end].to_string();
    let mut rest = String::with_capacity(content.len());
    rest.push_str(&content[..start]);
    rest.push_str(&content[end + THINK_CLOSE.len()..]);
    (rest.trim_start().to_string(), Some(reasoning))
}

/// Token counts for one completed provider request.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Provider-reported total, when the provider reports one.
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Sum of all counted tokens (used when the provider reports no total).
    pub fn counted_total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }
}

/// One normalized request: messages + model + tool schema.
#[derive(Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: ModelMeta,
    /// Tool schemas for native function calling; empty outside `tool` format.
    pub tools: Vec<Arc<ToolSpec>>,
    /// JSON schema for structured output, when requested.
    pub output_schema: Option<Value>,
}

/// Errors from provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("configuration required: {0}")]
    Config(String),
    #[error("invalid response: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("interrupted")]
    Interrupted,
}

impl ProviderError {
    /// Transient errors worth retrying: 5xx, 429, connection problems,
    /// timeouts, incomplete reads, and anything whose body smells like an
    /// overload (some proxies tunnel upstream "Overloaded" through odd shapes).
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            ProviderError::Api { status, body } => {
                *status >= 500 || *status == 429 || body_is_transient(body)
            }
            ProviderError::Stream(msg) => body_is_transient(msg),
            ProviderError::Config(_) | ProviderError::Serde(_) | ProviderError::Interrupted => {
                false
            }
        }
    }
}

fn body_is_transient(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("overload") || lower.contains("internal") || lower.contains("timeout")
}

/// Uniform provider interface: one blocking completion, one streaming.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> &Provider;

    /// One completion: returns the full assistant text (with any native tool
    /// calls flattened in) and the usage record.
    async fn chat(&self, req: &ChatRequest) -> Result<(String, Usage), ProviderError>;

    /// Streaming completion: sends tokens into `tokens` as they arrive and
    /// returns usage when the stream ends.
    async fn stream(
        &self,
        req: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<Usage, ProviderError>;
}

/// Total request timeout from `LLM_API_TIMEOUT` (seconds). Unset means no
/// overall deadline: long generations stream for minutes and must not be
/// cut mid-body.
fn api_timeout() -> Option<std::time::Duration> {
    std::env::var("LLM_API_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}

/// Resolved connection parameters for one provider.
#[derive(Clone, Debug)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

/// Resolves base URL and API key for a provider from env and user config.
/// `LLM_PROXY_URL` / `LLM_PROXY_API_KEY` override everything when set.
pub fn resolve_endpoint(provider: &Provider) -> Result<ProviderEndpoint, ProviderError> {
    if let Ok(proxy) = std::env::var("LLM_PROXY_URL") {
        let api_key = std::env::var("LLM_PROXY_API_KEY").unwrap_or_default();
        return Ok(ProviderEndpoint {
            base_url: proxy,
            api_key,
        });
    }

    let (base_url, api_key) = match provider {
        Provider::Azure => {
            let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT").map_err(|_| {
                ProviderError::Config(
                    "AZURE_OPENAI_ENDPOINT not set (your Azure resource endpoint URL)".to_string(),
                )
            })?;
            let key = require_key(provider)?;
            (endpoint, key)
        }
        Provider::Local => {
            let base = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
            let key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "local".to_string());
            (base, key)
        }
        Provider::Custom(name) => {
            let user = env_config::UserConfig::load("weft")
                .map_err(|e| ProviderError::Config(format!("user config: {e}")))?;
            let custom = user.provider(name).ok_or_else(|| {
                ProviderError::Config(format!(
                    "unknown provider {name}: add a [[providers]] entry to the user config"
                ))
            })?;
            let key = custom.resolve_api_key().ok_or_else(|| {
                ProviderError::Config(format!("no API key for custom provider {name}"))
            })?;
            (custom.base_url.clone(), key)
        }
        _ => {
            let base = provider
                .default_base_url()
                .ok_or_else(|| {
                    ProviderError::Config(format!("no base URL known for provider {provider}"))
                })?
                .to_string();
            (base, require_key(provider)?)
        }
    };
    Ok(ProviderEndpoint { base_url, api_key })
}

fn require_key(provider: &Provider) -> Result<String, ProviderError> {
    let var = provider
        .api_key_env()
        .ok_or_else(|| ProviderError::Config(format!("no API key env for {provider}")))?;
    std::env::var(var).map_err(|_| {
        ProviderError::Config(format!(
            "{var} not set: export it or add it to the [env] table of the user config"
        ))
    })
}

/// Builds the right adapter for a provider.
pub fn client_for(provider: &Provider) -> Result<Arc<dyn ProviderClient>, ProviderError> {
    let endpoint = resolve_endpoint(provider)?;
    let mut builder =
        reqwest::Client::builder().connect_timeout(std::time::Duration::from_secs(30));
    if let Some(timeout) = api_timeout() {
        builder = builder.timeout(timeout);
    }
    let http = builder.build().map_err(ProviderError::Http)?;
    Ok(if provider.is_openai_family() {
        Arc::new(OpenAiFamily::new(provider.clone(), endpoint, http))
    } else {
        Arc::new(AnthropicFamily::new(endpoint, http))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_think_splits_reasoning() {
        let (rest, think) = extract_think("<think>step by step</think>The answer is 4.");
        assert_eq!(rest, "The answer is 4.");
        assert_eq!(think.as_deref(), Some("step by step"));
    }

    #[test]
    fn extract_think_without_tags_is_identity() {
        let (rest, think) = extract_think("plain text");
        assert_eq!(rest, "plain text");
        assert!(think.is_none());
    }

    #[test]
    fn extract_think_ignores_unclosed_tag() {
        let (rest, think) = extract_think("<think>never closed");
        assert_eq!(rest, "<think>never closed");
        assert!(think.is_none());
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Api {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ProviderError::Api {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        // Proxied overload through a non-5xx shape is still transient.
        assert!(ProviderError::Api {
            status: 200,
            body: "Overloaded".to_string()
        }
        .is_retryable());
        assert!(ProviderError::Stream("Internal error".to_string()).is_retryable());
        assert!(!ProviderError::Api {
            status: 401,
            body: "bad key".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::Config("no key".to_string()).is_retryable());
    }

    #[test]
    fn tool_call_marker_shape() {
        assert_eq!(tool_call_marker("shell", "call_1"), "\n@shell(call_1): ");
    }
}
