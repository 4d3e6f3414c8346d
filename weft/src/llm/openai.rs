//! OpenAI-compatible adapter: OpenAI, Azure, OpenRouter, Gemini (OpenAI mode),
//! Groq, xAI, DeepSeek, Nvidia, local servers, and custom endpoints.
//!
//! Normalization quirks live here so the rest of the engine sees one message
//! shape: reasoning models get their system messages demoted and wrapped,
//! tool results become `role: tool` messages, assistant tool invocations are
//! split into `tool_calls`, and per-provider oddities are applied last.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    extract_think, tool_call_marker, ChatRequest, ProviderClient, ProviderEndpoint, ProviderError,
    Usage, THINK_CLOSE, THINK_OPEN,
};
use crate::message::{FileRef, Message, Role};
use crate::models::{ModelMeta, Provider};
use crate::tools::parse::parse_native_markers;

/// Model-name prefixes that mark reasoning-only models even when the metadata
/// table does not know the model.
const REASONING_PREFIXES: &[&str] = &[
    "o1", "o3", "o4", "gpt-5", "deepseek-reasoner", "kimi", "magistral",
];

pub(crate) fn is_reasoning_model(meta: &ModelMeta) -> bool {
    meta.supports_reasoning
        || REASONING_PREFIXES
            .iter()
            .any(|p| meta.name.starts_with(p) || meta.name.split('/').any(|seg| seg.starts_with(p)))
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

fn is_image(file: &FileRef) -> bool {
    let name = file.as_str().to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(&format!(".{ext}")))
}

#[derive(Serialize, Debug)]
struct OaiRequest<'a> {
    model: &'a str,
    messages: &'a [OaiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    pub role: &'static str,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct OaiToolCall {
    pub id: String,
    pub r#type: String,
    pub function: OaiFunction,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct OaiFunction {
    pub name: String,
    /// Arguments as a JSON-encoded string, per the wire format.
    pub arguments: String,
}

#[derive(Deserialize, Debug)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct OaiChoice {
    message: OaiResponseMessage,
}

#[derive(Deserialize, Debug)]
struct OaiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
    prompt_tokens_details: Option<OaiPromptDetails>,
}

#[derive(Deserialize, Debug, Default)]
struct OaiPromptDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl From<OaiUsage> for Usage {
    fn from(u: OaiUsage) -> Self {
        let cached = u
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0);
        Usage {
            input_tokens: u.prompt_tokens.saturating_sub(cached),
            output_tokens: u.completion_tokens,
            cache_read_tokens: cached,
            cache_creation_tokens: 0,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Deserialize, Debug)]
struct OaiChunk {
    #[serde(default)]
    choices: Vec<OaiChunkChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct OaiChunkChoice {
    delta: OaiDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct OaiDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCallDelta>,
    reasoning_content: Option<String>,
    /// Some OpenAI-compatible servers use `reasoning` instead.
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OaiToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OaiFunctionDelta>,
}

#[derive(Deserialize, Debug, Default)]
struct OaiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

pub struct OpenAiFamily {
    provider: Provider,
    endpoint: ProviderEndpoint,
    http: reqwest::Client,
}

impl OpenAiFamily {
    pub fn new(provider: Provider, endpoint: ProviderEndpoint, http: reqwest::Client) -> Self {
        Self {
            provider,
            endpoint,
            http,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let builder = self.http.post(self.url());
        // Azure authenticates with `api-key` instead of a bearer token.
        if matches!(self.provider, Provider::Azure) {
            builder.header("api-key", &self.endpoint.api_key)
        } else {
            builder.bearer_auth(&self.endpoint.api_key)
        }
    }

    fn sampling() -> (Option<f64>, Option<f64>) {
        let temperature = std::env::var("TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok());
        let top_p = std::env::var("TOP_P").ok().and_then(|v| v.parse().ok());
        (temperature, top_p)
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
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters_schema(),
                        }
                    })
                })
                .collect(),
        )
    }

    /// Structured-output request field; applied by chat and stream alike.
    fn response_format(req: &ChatRequest) -> Option<Value> {
        req.output_schema.as_ref().map(|schema| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": {"name": "output", "schema": schema},
            })
        })
    }

    /// Applies the whole normalization pipeline for this provider/model pair.
    pub(crate) fn normalize(&self, messages: &[Message], meta: &ModelMeta) -> Vec<OaiMessage> {
        let reasoning = is_reasoning_model(meta);
        let mut out: Vec<OaiMessage> = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::System | Role::Tool if msg.call_id.is_some() => {
                    let id = msg.call_id.clone();
                    // Merge consecutive tool results with the same id.
                    if let Some(last) = out.last_mut() {
                        if last.role == "tool" && last.tool_call_id == id {
                            merge_content(&mut last.content, &msg.content);
                            continue;
                        }
                    }
                    out.push(OaiMessage {
                        role: "tool",
                        content: Value::String(msg.content.clone()),
                        tool_calls: None,
                        tool_call_id: id,
                        reasoning_content: None,
                    });
                }
                // Tool-role message that lost its call id: still a tool result.
                Role::Tool => {
                    out.push(OaiMessage {
                        role: "tool",
                        content: Value::String(msg.content.clone()),
                        tool_calls: None,
                        tool_call_id: msg.call_id.clone(),
                        reasoning_content: None,
                    });
                }
                Role::System => {
                    if reasoning {
                        push_merged(
                            &mut out,
                            OaiMessage {
                                role: "user",
                                content: Value::String(format!(
                                    "<system>{}</system>",
                                    msg.content
                                )),
                                tool_calls: None,
                                tool_call_id: None,
                                reasoning_content: None,
                            },
                        );
                    } else {
                        push_merged(
                            &mut out,
                            OaiMessage {
                                role: "system",
                                content: Value::String(msg.content.clone()),
                                tool_calls: None,
                                tool_call_id: None,
                                reasoning_content: None,
                            },
                        );
                    }
                }
                Role::User => {
                    push_merged(
                        &mut out,
                        OaiMessage {
                            role: "user",
                            content: user_content(msg, meta),
                            tool_calls: None,
                            tool_call_id: None,
                            reasoning_content: None,
                        },
                    );
                }
                Role::Assistant => {
                    let (prose, invocations) = parse_native_markers(&msg.content);
                    let tool_calls = if invocations.is_empty() {
                        None
                    } else {
                        Some(
                            invocations
                                .into_iter()
                                .map(|inv| OaiToolCall {
                                    id: inv
                                        .call_id
                                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                                    r#type: "function".to_string(),
                                    function: OaiFunction {
                                        name: inv.tool,
                                        arguments: inv
                                            .kwargs
                                            .map(|v| v.to_string())
                                            .unwrap_or_else(|| "{}".to_string()),
                                    },
                                })
                                .collect(),
                        )
                    };
                    out.push(OaiMessage {
                        role: "assistant",
                        content: Value::String(prose),
                        tool_calls,
                        tool_call_id: None,
                        reasoning_content: None,
                    });
                }
            }
        }

        self.apply_quirks(&mut out, meta);
        out
    }

    /// Provider-specific fixes, applied after the generic normalization.
    fn apply_quirks(&self, messages: &mut [OaiMessage], meta: &ModelMeta) {
        let needs_string_content =
            matches!(self.provider, Provider::Groq | Provider::DeepSeek);
        let reasoning = is_reasoning_model(meta);

        for msg in messages.iter_mut() {
            if needs_string_content {
                flatten_to_string(&mut msg.content);
            }
            // DeepSeek rejects assistant tool_calls without a reasoning_content field.
            if matches!(self.provider, Provider::DeepSeek)
                && msg.role == "assistant"
                && msg.tool_calls.is_some()
                && msg.reasoning_content.is_none()
            {
                msg.reasoning_content = Some(String::new());
            }
            // OpenRouter reasoning models want reasoning split out of content,
            // otherwise the model sees its own thinking twice.
            if matches!(self.provider, Provider::OpenRouter)
                && reasoning
                && msg.role == "assistant"
            {
                if let Value::String(text) = &msg.content {
                    let (rest, think) = extract_think(text);
                    if let Some(think) = think {
                        msg.content = Value::String(rest);
                        msg.reasoning_content = Some(think);
                    } else if msg.reasoning_content.is_none() {
                        msg.reasoning_content = Some(String::new());
                    }
                }
            }
        }
    }
}

fn push_merged(out: &mut Vec<OaiMessage>, msg: OaiMessage) {
    if let Some(last) = out.last_mut() {
        if last.role == msg.role && last.tool_calls.is_none() && last.tool_call_id.is_none() {
            merge_content_value(&mut last.content, &msg.content);
            return;
        }
    }
    out.push(msg);
}

fn merge_content(slot: &mut Value, extra: &str) {
    if let Value::String(s) = slot {
        s.push_str("\n\n");
        s.push_str(extra);
    }
}

fn merge_content_value(slot: &mut Value, extra: &Value) {
    match (&mut *slot, extra) {
        (Value::String(a), Value::String(b)) => {
            a.push_str("\n\n");
            a.push_str(b);
        }
        (Value::Array(a), Value::Array(b)) => a.extend(b.iter().cloned()),
        (Value::Array(a), Value::String(b)) => {
            a.push(serde_json::json!({"type": "text", "text": b}))
        }
        (slot_ref, Value::Array(b)) => {
            let mut parts = vec![serde_json::json!({
                "type": "text",
                "text": slot_ref.as_str().unwrap_or_default()
            })];
            parts.extend(b.iter().cloned());
            *slot_ref = Value::Array(parts);
        }
        _ => {}
    }
}

/// Builds user content: plain string, or multimodal parts when image files
/// are attached and the model supports vision.
fn user_content(msg: &Message, meta: &ModelMeta) -> Value {
    let images: Vec<&FileRef> = msg.files.iter().filter(|f| is_image(f)).collect();
    if images.is_empty() || !meta.supports_vision {
        return Value::String(msg.content.clone());
    }
    let mut parts = Vec::new();
    if !msg.content.is_empty() {
        parts.push(serde_json::json!({"type": "text", "text": msg.content}));
    }
    for img in images {
        parts.push(serde_json::json!({
            "type": "image_url",
            "image_url": {"url": img.as_str()},
        }));
    }
    Value::Array(parts)
}

/// Collapses multimodal parts into a single string (Groq/DeepSeek requirement):
/// text parts joined with blank lines; image-only content becomes a stub.
fn flatten_to_string(content: &mut Value) {
    if let Value::Array(parts) = content {
        let texts: Vec<String> = parts
            .iter()
            .filter_map(|p| {
                (p.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| p.get("text").and_then(Value::as_str).unwrap_or("").to_string())
            })
            .filter(|t| !t.is_empty())
            .collect();
        *content = if texts.is_empty() {
            Value::String("[non-text content]".to_string())
        } else {
            Value::String(texts.join("\n\n"))
        };
    }
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
impl ProviderClient for OpenAiFamily {
    fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn chat(&self, req: &ChatRequest) -> Result<(String, Usage), ProviderError> {
        let messages = self.normalize(&req.messages, &req.model);
        let (temperature, top_p) = Self::sampling();
        let body = OaiRequest {
            model: &req.model.name,
            messages: &messages,
            temperature,
            top_p,
            stream: false,
            stream_options: None,
            tools: Self::tool_defs(req),
            response_format: Self::response_format(req),
        };

        let response = self.request_builder().json(&body).send().await?;
        let response = error_for_status(response).await?;
        let parsed: OaiResponse = response.json().await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Stream("response had no choices".to_string()))?;

        let mut text = String::new();
        if let Some(reasoning) = choice.message.reasoning_content {
            if !reasoning.is_empty() {
                text.push_str(THINK_OPEN);
                text.push_str(&reasoning);
                text.push_str(THINK_CLOSE);
                text.push('\n');
            }
        }
        text.push_str(choice.message.content.as_deref().unwrap_or(""));
        for call in choice.message.tool_calls {
            text.push_str(&tool_call_marker(&call.function.name, &call.id));
            text.push_str(&call.function.arguments);
        }

        let usage = parsed.usage.map(Usage::from).unwrap_or_default();
        Ok((text, usage))
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<Usage, ProviderError> {
        let messages = self.normalize(&req.messages, &req.model);
        let (temperature, top_p) = Self::sampling();
        let body = OaiRequest {
            model: &req.model.name,
            messages: &messages,
            temperature,
            top_p,
            stream: true,
            stream_options: Some(serde_json::json!({"include_usage": true})),
            tools: Self::tool_defs(req),
            response_format: Self::response_format(req),
        };

        let response = self.request_builder().json(&body).send().await?;
        let response = error_for_status(response).await?;

        let mut usage = Usage::default();
        let mut in_think = false;
        // call_id per tool-call index; a new id means a new marker.
        let mut announced: Vec<Option<String>> = Vec::new();

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ProviderError::Stream(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: OaiChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(e) => {
                    return Err(ProviderError::Stream(format!(
                        "bad chunk: {e}: {}",
                        event.data
                    )))
                }
            };
            if let Some(u) = chunk.usage {
                usage = u.into();
            }
            for choice in chunk.choices {
                // Reasoning fragments, bracketed with sentinels.
                let reasoning = choice
                    .delta
                    .reasoning_content
                    .or(choice.delta.reasoning)
                    .filter(|r| !r.is_empty());
                if let Some(r) = reasoning {
                    if !in_think {
                        in_think = true;
                        send(&tokens, THINK_OPEN.to_string()).await?;
                    }
                    send(&tokens, r).await?;
                }
                if let Some(content) = choice.delta.content {
                    if in_think && !content.is_empty() {
                        in_think = false;
                        send(&tokens, format!("{THINK_CLOSE}\n")).await?;
                    }
                    if !content.is_empty() {
                        send(&tokens, content).await?;
                    }
                }
                for delta in choice.delta.tool_calls {
                    let idx = delta.index as usize;
                    if announced.len() <= idx {
                        announced.resize(idx + 1, None);
                    }
                    if let Some(id) = delta.id.clone() {
                        if announced[idx].as_deref() != Some(id.as_str()) {
                            let name = delta
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default();
                            announced[idx] = Some(id.clone());
                            if in_think {
                                in_think = false;
                                send(&tokens, format!("{THINK_CLOSE}\n")).await?;
                            }
                            send(&tokens, tool_call_marker(&name, &id)).await?;
                        }
                    }
                    if let Some(args) = delta.function.and_then(|f| f.arguments) {
                        if !args.is_empty() {
                            send(&tokens, args).await?;
                        }
                    }
                }
                if choice.finish_reason.is_some() && in_think {
                    in_think = false;
                    send(&tokens, THINK_CLOSE.to_string()).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::get_model;

    fn family(provider: Provider) -> OpenAiFamily {
        OpenAiFamily::new(
            provider,
            ProviderEndpoint {
                base_url: "http://localhost:9".to_string(),
                api_key: "test".to_string(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn reasoning_models_detected_by_prefix() {
        assert!(is_reasoning_model(&get_model("openai/o1")));
        assert!(is_reasoning_model(&get_model("openai/o3-mini")));
        assert!(is_reasoning_model(&get_model("deepseek/deepseek-reasoner")));
        assert!(is_reasoning_model(&get_model(
            "openrouter/moonshotai/kimi-k2-0905"
        )));
        assert!(!is_reasoning_model(&get_model("openai/gpt-4o-mini")));
    }

    #[test]
    fn reasoning_model_demotes_and_merges_system_messages() {
        let fam = family(Provider::OpenAI);
        let meta = get_model("openai/o1");
        let msgs = vec![
            Message::system("You are helpful."),
            Message::system("Extra instructions."),
            Message::user("hi"),
        ];
        let out = fam.normalize(&msgs, &meta);
        assert_eq!(out.len(), 1, "all three merged into one user message");
        assert_eq!(out[0].role, "user");
        let text = out[0].content.as_str().unwrap();
        assert!(text.starts_with("<system>You are helpful.</system>"));
        assert!(text.contains("<system>Extra instructions.</system>"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn non_reasoning_model_keeps_system_role() {
        let fam = family(Provider::OpenAI);
        let meta = get_model("openai/gpt-4o");
        let out = fam.normalize(&[Message::system("sys"), Message::user("hi")], &meta);
        assert_eq!(out[0].role, "system");
        assert_eq!(out[1].role, "user");
    }

    #[test]
    fn tool_results_become_tool_role_and_merge_by_id() {
        let fam = family(Provider::OpenAI);
        let meta = get_model("openai/gpt-4o");
        let msgs = vec![
            Message::system("part 1").with_call_id("call_1"),
            Message::system("part 2").with_call_id("call_1"),
            Message::system("other").with_call_id("call_2"),
        ];
        let out = fam.normalize(&msgs, &meta);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, "tool");
        assert_eq!(out[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out[0].content.as_str().unwrap(), "part 1\n\npart 2");
        assert_eq!(out[1].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn assistant_invocations_split_into_tool_calls() {
        let fam = family(Provider::OpenAI);
        let meta = get_model("openai/gpt-4o");
        let content = format!(
            "Let me check.{}{}",
            tool_call_marker("shell", "call_9"),
            r#"{"command": "ls"}"#
        );
        let out = fam.normalize(&[Message::assistant(content)], &meta);
        assert_eq!(out.len(), 1);
        let calls = out[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].function.name, "shell");
        assert_eq!(calls[0].function.arguments, r#"{"command": "ls"}"#);
        assert_eq!(out[0].content.as_str().unwrap().trim(), "Let me check.");
    }

    #[test]
    fn deepseek_assistant_tool_calls_get_reasoning_content() {
        let fam = family(Provider::DeepSeek);
        let meta = get_model("deepseek/deepseek-chat");
        let content = format!("{}{}", tool_call_marker("shell", "c1"), "{}");
        let out = fam.normalize(&[Message::assistant(content)], &meta);
        assert_eq!(out[0].reasoning_content.as_deref(), Some(""));
    }

    #[test]
    fn groq_flattens_multimodal_to_string() {
        let fam = family(Provider::Groq);
        let mut meta = get_model("groq/llama-3.3-70b-versatile");
        meta.supports_vision = true;
        let msg = Message::user("look at this")
            .with_files(vec![FileRef::parse("https://example.com/cat.png")]);
        let out = fam.normalize(&[msg], &meta);
        assert_eq!(out[0].content.as_str().unwrap(), "look at this");

        let image_only =
            Message::user("").with_files(vec![FileRef::parse("https://example.com/cat.png")]);
        let out = fam.normalize(&[image_only], &meta);
        assert_eq!(out[0].content.as_str().unwrap(), "[non-text content]");
    }

    #[test]
    fn openrouter_reasoning_extracts_think_into_reasoning_content() {
        let fam = family(Provider::OpenRouter);
        let meta = get_model("openrouter/mistralai/magistral-medium-2506");
        let out = fam.normalize(
            &[Message::assistant("<think>pondering</think>The answer.")],
            &meta,
        );
        assert_eq!(out[0].reasoning_content.as_deref(), Some("pondering"));
        assert_eq!(out[0].content.as_str().unwrap(), "The answer.");
    }

    #[test]
    fn output_schema_maps_to_response_format() {
        let req = ChatRequest {
            messages: vec![],
            model: get_model("openai/gpt-4o"),
            tools: vec![],
            output_schema: Some(serde_json::json!({"type": "object"})),
        };
        let rf = OpenAiFamily::response_format(&req).unwrap();
        assert_eq!(rf["type"], "json_schema");
        assert_eq!(rf["json_schema"]["name"], "output");
        assert_eq!(rf["json_schema"]["schema"]["type"], "object");

        let without = ChatRequest {
            output_schema: None,
            ..req
        };
        assert!(OpenAiFamily::response_format(&without).is_none());
    }

    #[test]
    fn vision_model_gets_image_parts() {
        let fam = family(Provider::OpenAI);
        let meta = get_model("openai/gpt-4o");
        let msg = Message::user("what is this?")
            .with_files(vec![FileRef::parse("https://example.com/dog.jpg")]);
        let out = fam.normalize(&[msg], &meta);
        let parts = out[0].content.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
    }
}
