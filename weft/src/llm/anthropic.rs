//! Native Anthropic messages API adapter, with prompt caching and thinking.
//!
//! The first system message becomes the top-level `system` field; later
//! system messages are rewrapped as `<system>` user messages. Tool results
//! ride inside user messages as `tool_result` blocks, assistant invocations
//! as `tool_use` blocks. Up to four `cache_control: ephemeral` breakpoints
//! are placed by the configured [`CacheStrategy`](super::CacheStrategy).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    default_cache_strategy, tool_call_marker, CacheStrategy, ChatRequest, ProviderClient,
    ProviderEndpoint, ProviderError, Usage, THINK_CLOSE, THINK_OPEN,
};
use crate::message::{Message, Role};
use crate::models::Provider;
use crate::tools::parse::parse_native_markers;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_THINKING_BUDGET: u64 = 16_000;

pub struct AnthropicFamily {
    provider: Provider,
    endpoint: ProviderEndpoint,
    http: reqwest::Client,
    cache_strategy: Box<dyn CacheStrategy>,
}

#[derive(Serialize, Debug)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    messages: &'a [AnthropicMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub(crate) struct AnthropicMessage {
    pub role: &'static str,
    /// Array of content blocks.
    pub content: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<Value>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug, Default, Clone)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

impl AnthropicUsage {
    fn merge_into(&self, usage: &mut Usage) {
        usage.input_tokens = usage.input_tokens.max(self.input_tokens);
        usage.output_tokens = usage.output_tokens.max(self.output_tokens);
        usage.cache_read_tokens = usage.cache_read_tokens.max(self.cache_read_input_tokens);
        usage.cache_creation_tokens = usage
            .cache_creation_tokens
            .max(self.cache_creation_input_tokens);
    }
}

/// Streaming events we care about; everything else is ignored.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        delta: ContentDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop {},
    Ping {},
    Error {
        error: Value,
    },
}

#[derive(Deserialize, Debug)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {},
    ToolUse {
        id: String,
        name: String,
    },
    RedactedThinking {},
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta {},
}

impl AnthropicFamily {
    pub fn new(endpoint: ProviderEndpoint, http: reqwest::Client) -> Self {
        Self {
            provider: Provider::Anthropic,
            endpoint,
            http,
            cache_strategy: default_cache_strategy(),
        }
    }

    pub fn with_cache_strategy(mut self, strategy: Box<dyn CacheStrategy>) -> Self {
        self.cache_strategy = strategy;
        self
    }

    fn url(&self) -> String {
        format!("{}/messages", self.endpoint.base_url.trim_end_matches('/'))
    }

    /// Thinking config: enabled when the model supports it, the request has
    /// no tools, and `WEFT_REASONING` does not disable it.
    fn thinking_config(req: &ChatRequest) -> Option<Value> {
        if !req.model.supports_reasoning || !req.tools.is_empty() {
            return None;
        }
        match std::env::var("WEFT_REASONING").as_deref() {
            Ok("0") | Ok("false") => return None,
            _ => {}
        }
        let budget = std::env::var("WEFT_REASONING_BUDGET")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_THINKING_BUDGET);
        Some(serde_json::json!({
            "type": "enabled",
            "budget_tokens": budget,
        }))
    }

    fn tool_defs(req: &ChatRequest) -> Option<Vec<Value>> {
        if req.tools.is_empty() {
            return None;
        }
        Some(
            req.tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters_schema(),
                    })
                })
                .collect(),
        )
    }

    /// Normalizes messages into (system field, message list) with cache marks.
    pub(crate) fn normalize(&self, messages: &[Message]) -> (Option<Value>, Vec<AnthropicMessage>) {
        let mut iter = messages.iter().peekable();

        // First system message becomes the top-level system field.
        let mut system_text = String::new();
        if let Some(first) = iter.peek() {
            if first.role == Role::System && first.call_id.is_none() {
                system_text = first.content.clone();
                iter.next();
            }
        }

        let rest: Vec<&Message> = iter.collect();
        let mut out: Vec<AnthropicMessage> = Vec::with_capacity(rest.len());
        // Map log indices to output indices for cache placement afterwards.
        for msg in &rest {
            match msg.role {
                Role::System | Role::Tool if msg.call_id.is_some() => {
                    let block = serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": msg.call_id,
                        "content": msg.content,
                    });
                    push_user_block(&mut out, block);
                }
                Role::System | Role::Tool => {
                    let block = serde_json::json!({
                        "type": "text",
                        "text": format!("<system>{}</system>", msg.content),
                    });
                    push_user_block(&mut out, block);
                }
                Role::User => {
                    if msg.content.is_empty() {
                        continue; // the API rejects empty text blocks
                    }
                    let block = serde_json::json!({"type": "text", "text": msg.content});
                    push_user_block(&mut out, block);
                }
                Role::Assistant => {
                    let (prose, invocations) = parse_native_markers(&msg.content);
                    let mut blocks = Vec::new();
                    if !prose.trim().is_empty() {
                        blocks.push(serde_json::json!({"type": "text", "text": prose}));
                    }
                    for inv in invocations {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": inv.call_id.clone().unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                            "name": inv.tool,
                            "input": inv.kwargs.unwrap_or_else(|| serde_json::json!({})),
                        }));
                    }
                    if !blocks.is_empty() {
                        out.push(AnthropicMessage {
                            role: "assistant",
                            content: blocks,
                        });
                    }
                }
            }
        }

        // Trailing whitespace on the final assistant text is rejected by the API.
        if let Some(last) = out.last_mut() {
            if last.role == "assistant" {
                for block in last.content.iter_mut() {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            let trimmed = text.trim_end().to_string();
                            block["text"] = Value::String(trimmed);
                        }
                    }
                }
                last.content.retain(|b| {
                    b.get("type").and_then(Value::as_str) != Some("text")
                        || b.get("text").and_then(Value::as_str).map(str::is_empty) != Some(true)
                });
            }
        }

        // Cache breakpoints.
        let placement = self.cache_strategy.placements(
            &system_text,
            &rest.iter().map(|m| (*m).clone()).collect::<Vec<_>>(),
        );
        let system = if system_text.is_empty() {
            None
        } else {
            let mut block = serde_json::json!({"type": "text", "text": system_text});
            if placement.cache_system {
                block["cache_control"] = serde_json::json!({"type": "ephemeral"});
            }
            Some(Value::Array(vec![block]))
        };
        // Breakpoints land on the last content block of the mapped messages;
        // placement indices refer to the pre-merge list, so clamp into range.
        for idx in placement.message_indices {
            let out_idx = idx.min(out.len().saturating_sub(1));
            if let Some(m) = out.get_mut(out_idx) {
                if let Some(last_block) = m.content.last_mut() {
                    last_block["cache_control"] = serde_json::json!({"type": "ephemeral"});
                }
            }
        }

        (system, out)
    }
}

/// Appends a block to the previous user message, or starts a new one.
/// Consecutive user-side messages are merged, as the API requires alternation.
fn push_user_block(out: &mut Vec<AnthropicMessage>, block: Value) {
    if let Some(last) = out.last_mut() {
        if last.role == "user" {
            last.content.push(block);
            return;
        }
    }
    out.push(AnthropicMessage {
        role: "user",
        content: vec![block],
    });
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ProviderClient for AnthropicFamily {
    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn chat(&self, req: &ChatRequest) -> Result<(String, Usage), ProviderError> {
        let (system, messages) = self.normalize(&req.messages);
        let body = AnthropicRequest {
            model: &req.model.name,
            max_tokens: req.model.max_output,
            messages: &messages,
            system,
            tools: Self::tool_defs(req),
            stream: false,
            thinking: Self::thinking_config(req),
            temperature: std::env::var("TEMPERATURE").ok().and_then(|v| v.parse().ok()),
        };

        let response = self
            .http
            .post(self.url())
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let parsed: AnthropicResponse = response.json().await?;

        let mut text = String::new();
        for block in parsed.content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    text.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""))
                }
                Some("thinking") => {
                    let thinking = block.get("thinking").and_then(Value::as_str).unwrap_or("");
                    if !thinking.is_empty() {
                        text.push_str(THINK_OPEN);
                        text.push_str(thinking);
                        text.push_str(THINK_CLOSE);
                        text.push('\n');
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or("");
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                    text.push_str(&tool_call_marker(name, id));
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    text.push_str(&input.to_string());
                }
                _ => {}
            }
        }

        let mut usage = Usage::default();
        if let Some(u) = parsed.usage {
            u.merge_into(&mut usage);
        }
        Ok((text, usage))
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<Usage, ProviderError> {
        let (system, messages) = self.normalize(&req.messages);
        let body = AnthropicRequest {
            model: &req.model.name,
            max_tokens: req.model.max_output,
            messages: &messages,
            system,
            tools: Self::tool_defs(req),
            stream: true,
            thinking: Self::thinking_config(req),
            temperature: std::env::var("TEMPERATURE").ok().and_then(|v| v.parse().ok()),
        };

        let response = self
            .http
            .post(self.url())
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let mut usage = Usage::default();
        let mut in_think = false;

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ProviderError::Stream(e.to_string()))?;
            let parsed: StreamEvent = match serde_json::from_str(&event.data) {
                Ok(ev) => ev,
                Err(_) => continue, // unknown event types are fine to skip
            };
            match parsed {
                StreamEvent::MessageStart { message } => {
                    if let Some(u) = message.usage {
                        u.merge_into(&mut usage);
                    }
                }
                StreamEvent::ContentBlockStart { content_block } => match content_block {
                    ContentBlock::Thinking {} => {
                        in_think = true;
                        send(&tokens, THINK_OPEN.to_string()).await?;
                    }
                    ContentBlock::ToolUse { id, name } => {
                        send(&tokens, tool_call_marker(&name, &id)).await?;
                    }
                    ContentBlock::Text { text } => {
                        if !text.is_empty() {
                            send(&tokens, text).await?;
                        }
                    }
                    ContentBlock::RedactedThinking {} => {}
                },
                StreamEvent::ContentBlockDelta { delta } => match delta {
                    ContentDelta::TextDelta { text } => send(&tokens, text).await?,
                    ContentDelta::ThinkingDelta { thinking } => {
                        send(&tokens, thinking).await?
                    }
                    ContentDelta::InputJsonDelta { partial_json } => {
                        send(&tokens, partial_json).await?
                    }
                    ContentDelta::SignatureDelta {} => {}
                },
                StreamEvent::ContentBlockStop {} => {
                    if in_think {
                        in_think = false;
                        send(&tokens, format!("{THINK_CLOSE}\n")).await?;
                    }
                }
                StreamEvent::MessageDelta { usage: u } => {
                    if let Some(u) = u {
                        u.merge_into(&mut usage);
                    }
                }
                StreamEvent::MessageStop {} => break,
                StreamEvent::Ping {} => {}
                StreamEvent::Error { error } => {
                    return Err(ProviderError::Stream(error.to_string()));
                }
            }
        }

        Ok(usage)
    }
}

async fn send(tokens: &mpsc::Sender<String>, token: String) -> Result<(), ProviderError> {
    tokens
        .send(token)
        .await
        .map_err(|_| ProviderError::Interrupted)
}
