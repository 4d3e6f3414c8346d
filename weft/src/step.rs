//! The step engine: generate → detect → confirm → execute → append → repeat.
//!
//! One step is one model call plus the bookkeeping around it. Tool execution
//! feeds its output back into the log and kicks off another step, producing
//! the generate-execute ping-pong of an agent loop; a step that yields no
//! runnable tools ends the ping-pong.
//!
//! Interruption is cooperative and checked at every token boundary; a partial
//! assistant message is always persisted with an `[INTERRUPTED]` suffix
//! before control returns, so the log never lies about what was streamed.

use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use stream_event::SessionEvent;

use crate::costs::{CostEntry, SessionCosts};
use crate::events::EventSink;
use crate::hooks::{HookBus, HookContext, HookError, HookType};
use crate::interrupt::Interrupt;
use crate::llm::retry::{retry_chat, retry_stream, RetryPolicy};
use crate::llm::{ChatRequest, ProviderClient, ProviderError};
use crate::message::{Message, Role, UsageMetadata};
use crate::models::{compute_cost, get_model};
use crate::naming::spawn_auto_name;
use crate::store::{prepare_messages, ConversationLog, PrepareOptions, StoreError, Summarizer};
use crate::tools::{
    parse_tool_uses, ExecContext, ToolError, ToolFormatName, ToolRegistry, ToolUse,
};

pub const INTERRUPTED_SUFFIX: &str = " [INTERRUPTED]";
pub const INTERRUPTED_SENTINEL: &str = "Interrupted by user";

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("a step is already running for this conversation")]
    Busy,
    #[error("no pending tool with id {0}")]
    UnknownTool(String),
}

/// Per-step configuration, typically derived from the chat config.
#[derive(Clone, Debug)]
pub struct StepConfig {
    /// Qualified `provider/model` string.
    pub model: String,
    pub tool_format: ToolFormatName,
    pub stream: bool,
    /// Confirm every parsed tool without asking.
    pub auto_confirm: bool,
    pub workspace: PathBuf,
    /// Stop generating once a complete tool block has streamed in.
    pub break_on_tooluse: bool,
}

impl StepConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tool_format: ToolFormatName::Markdown,
            stream: true,
            auto_confirm: false,
            workspace: PathBuf::from("."),
            break_on_tooluse: break_on_tooluse_default(),
        }
    }

    pub fn from_chat_config(config: &env_config::ChatConfig, fallback_model: &str) -> Self {
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| fallback_model.to_string()),
            tool_format: config.tool_format,
            stream: config.stream,
            auto_confirm: false,
            workspace: config.workspace.clone().unwrap_or_else(|| PathBuf::from(".")),
            break_on_tooluse: break_on_tooluse_default(),
        }
    }
}

fn break_on_tooluse_default() -> bool {
    !matches!(
        std::env::var("WEFT_BREAK_ON_TOOLUSE").as_deref(),
        Ok("0") | Ok("false")
    )
}

/// Status of one tracked tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Executing,
    Done,
    Failed,
    Skipped,
}

/// Entry in a session's pending-tools table.
#[derive(Clone, Debug)]
pub struct ToolExecution {
    pub status: ToolStatus,
    pub tooluse: ToolUse,
    pub auto_confirm: bool,
}

/// Everything a step needs from its session. Cheap to clone.
#[derive(Clone)]
pub struct StepContext {
    pub conversation_id: String,
    pub events: EventSink,
    /// Guards re-entry; doubles as the interrupt signal when cleared mid-step.
    pub generating: Arc<AtomicBool>,
    pub interrupt: Interrupt,
    pub pending_tools: Arc<DashMap<String, ToolExecution>>,
    /// Remaining auto-confirmations granted by the user (`auto(n)`).
    pub auto_confirm_count: Arc<AtomicI64>,
    pub costs: Arc<SessionCosts>,
    pub hooks: Arc<HookBus>,
    pub client: Arc<dyn ProviderClient>,
    /// Cheap model for summaries and auto-naming; falls back to `client`.
    pub summary_client: Option<Arc<dyn ProviderClient>>,
    pub tools: Arc<ToolRegistry>,
    pub retry: RetryPolicy,
}

impl StepContext {
    pub fn new(
        conversation_id: impl Into<String>,
        client: Arc<dyn ProviderClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            events: EventSink::noop(),
            generating: Arc::new(AtomicBool::new(false)),
            interrupt: Interrupt::new(),
            pending_tools: Arc::new(DashMap::new()),
            auto_confirm_count: Arc::new(AtomicI64::new(0)),
            costs: Arc::new(SessionCosts::new("cli")),
            hooks: Arc::new(HookBus::new()),
            client,
            summary_client: None,
            tools,
            retry: RetryPolicy::default(),
        }
    }

    fn hook_ctx(&self, hook: HookType, log: &ConversationLog, cfg: &StepConfig) -> HookContext {
        HookContext::new(hook, self.conversation_id.clone(), log.dir().to_path_buf())
            .with_workspace(Some(cfg.workspace.clone()))
            .with_messages(log.messages().to_vec())
    }
}

/// Result of one step.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// The assistant message appended by this step, if any.
    pub message: Option<Message>,
    /// Tool ids recorded as pending, in parse order.
    pub pending: Vec<String>,
    pub interrupted: bool,
}

fn message_value(message: &Message) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

fn append_and_event(
    log: &mut ConversationLog,
    ctx: &StepContext,
    message: Message,
) -> Result<(), StepError> {
    log.append(message.clone())?;
    ctx.events.emit(SessionEvent::MessageAdded {
        message: message_value(&message),
    });
    Ok(())
}

/// Summarizer backed by the session's summary model.
struct ModelSummarizer {
    client: Arc<dyn ProviderClient>,
    model: crate::models::ModelMeta,
}

#[async_trait::async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        let req = ChatRequest {
            messages: vec![
                Message::system("Summarize the following tool output in a few sentences, keeping exact values that look important."),
                Message::user(text.to_string()),
            ],
            model: self.model.clone(),
            tools: vec![],
            output_schema: None,
        };
        let (summary, _usage) = self.client.chat(&req).await?;
        Ok(summary)
    }
}

/// Runs one step. Re-entry is rejected with [`StepError::Busy`]; the
/// `generating` flag acts as the per-conversation mutex.
pub async fn step(
    log: &mut ConversationLog,
    ctx: &StepContext,
    cfg: &StepConfig,
) -> Result<StepOutcome, StepError> {
    if ctx
        .generating
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(StepError::Busy);
    }
    let result = step_inner(log, ctx, cfg).await;
    ctx.generating.store(false, Ordering::SeqCst);
    result
}

async fn step_inner(
    log: &mut ConversationLog,
    ctx: &StepContext,
    cfg: &StepConfig,
) -> Result<StepOutcome, StepError> {
    let meta = get_model(&cfg.model);

    // New conversation: fire session-start hooks before anything else.
    let is_new = !log.messages().iter().any(|m| m.role == Role::Assistant);
    if is_new {
        let yielded = ctx
            .hooks
            .trigger(ctx.hook_ctx(HookType::SessionStart, log, cfg))
            .await?;
        for m in yielded {
            append_and_event(log, ctx, m)?;
        }
    }

    for m in ctx
        .hooks
        .trigger(ctx.hook_ctx(HookType::MessagePreProcess, log, cfg))
        .await?
    {
        append_and_event(log, ctx, m)?;
    }

    for m in ctx
        .hooks
        .trigger(ctx.hook_ctx(HookType::GenerationPre, log, cfg))
        .await?
    {
        append_and_event(log, ctx, m)?;
    }

    // Prepare model input (file materialization, summarization, trimming).
    let summarizer = ctx.summary_client.clone().map(|client| {
        let provider = client.provider().clone();
        let model_name = provider
            .summary_model()
            .map(|m| format!("{provider}/{m}"))
            .unwrap_or_else(|| cfg.model.clone());
        ModelSummarizer {
            client,
            model: get_model(&model_name),
        }
    });
    let summarizer_ref: Option<&dyn Summarizer> =
        summarizer.as_ref().map(|s| s as &dyn Summarizer);
    let prepared = prepare_messages(
        log.messages(),
        Some(cfg.workspace.as_path()),
        summarizer_ref,
        &PrepareOptions {
            context_window: meta.context,
            summarize_threshold: Some(meta.context / 2),
            ..PrepareOptions::default()
        },
    )
    .await;

    let native_tools = if cfg.tool_format == ToolFormatName::Tool {
        ctx.tools.list()
    } else {
        Vec::new()
    };
    let request = Arc::new(ChatRequest {
        messages: prepared,
        model: meta.clone(),
        tools: native_tools,
        output_schema: None,
    });

    ctx.events.emit(SessionEvent::GenerationStarted);

    let (content, usage, interrupted) = if cfg.stream {
        stream_generation(ctx, cfg, request).await?
    } else {
        let client = ctx.client.clone();
        let req = request.clone();
        let (text, usage) =
            retry_chat(&ctx.retry, move || {
                let client = client.clone();
                let req = req.clone();
                async move { client.chat(&req).await }
            })
            .await?;
        (text, Some(usage), false)
    };

    // Construct and persist the assistant message.
    let metadata = usage.as_ref().map(|u| {
        let cost = compute_cost(&meta, u);
        ctx.costs.record(CostEntry {
            timestamp: chrono::Utc::now(),
            model: meta.full_name(),
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_tokens,
            cache_creation_tokens: u.cache_creation_tokens,
            cost,
        });
        UsageMetadata {
            model: meta.full_name(),
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_tokens,
            cache_creation_tokens: u.cache_creation_tokens,
            total_tokens: u.total_tokens,
            cost,
        }
    });
    let mut message = Message::assistant(content);
    if let Some(metadata) = metadata {
        message = message.with_metadata(metadata);
    }
    log.append(message.clone())?;

    if interrupted {
        log.append(Message::system(INTERRUPTED_SENTINEL))?;
        ctx.events.emit(SessionEvent::Interrupted);
        ctx.pending_tools.clear();
        return Ok(StepOutcome {
            message: Some(message),
            pending: Vec::new(),
            interrupted: true,
        });
    }

    for m in ctx
        .hooks
        .trigger(ctx.hook_ctx(HookType::MessagePostProcess, log, cfg))
        .await?
    {
        append_and_event(log, ctx, m)?;
    }
    for m in ctx
        .hooks
        .trigger(
            ctx.hook_ctx(HookType::GenerationPost, log, cfg)
                .with_data(message_value(&message)),
        )
        .await?
    {
        append_and_event(log, ctx, m)?;
    }

    // First reply of an unnamed conversation: request a name in the background.
    let assistant_count = log
        .messages()
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    if assistant_count == 1 {
        if let Ok(chat_config) = env_config::ChatConfig::load(log.dir()) {
            if chat_config.name.is_none() {
                let naming_client = ctx
                    .summary_client
                    .clone()
                    .unwrap_or_else(|| ctx.client.clone());
                spawn_auto_name(
                    log.dir().to_path_buf(),
                    naming_client,
                    meta.clone(),
                    log.messages().to_vec(),
                    ctx.events.clone(),
                );
            }
        }
    }

    ctx.events.emit(SessionEvent::GenerationComplete {
        message: message_value(&message),
    });

    // Record every runnable tool use as pending.
    let uses = parse_tool_uses(&message.content, cfg.tool_format, false, &ctx.tools);
    if uses.len() > 1 {
        tracing::warn!(
            "assistant message contains {} runnable tools; they will execute serially",
            uses.len()
        );
    }
    let auto = cfg.auto_confirm || ctx.auto_confirm_count.load(Ordering::SeqCst) > 0;
    let mut pending = Vec::with_capacity(uses.len());
    for tooluse in uses {
        let tool_id = uuid::Uuid::new_v4().to_string();
        ctx.pending_tools.insert(
            tool_id.clone(),
            ToolExecution {
                status: ToolStatus::Pending,
                tooluse: tooluse.clone(),
                auto_confirm: auto,
            },
        );
        ctx.events.emit(SessionEvent::ToolPending {
            tool_id: tool_id.clone(),
            tooluse: tooluse.to_json(),
            auto_confirm: auto,
        });
        pending.push(tool_id);
    }

    Ok(StepOutcome {
        message: Some(message),
        pending,
        interrupted: false,
    })
}

/// Streams tokens, watching for interruption and complete tool blocks.
async fn stream_generation(
    ctx: &StepContext,
    cfg: &StepConfig,
    request: Arc<ChatRequest>,
) -> Result<(String, Option<crate::llm::Usage>, bool), StepError> {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let client = ctx.client.clone();
    let policy = ctx.retry.clone();
    let req = request.clone();
    let handle = tokio::spawn(async move {
        retry_stream(&policy, tx, move |inner_tx| {
            let client = client.clone();
            let req = req.clone();
            async move { client.stream(&req, inner_tx).await }
        })
        .await
    });

    let mut content = String::new();
    let mut interrupted = false;

    while let Some(token) = rx.recv().await {
        if ctx.interrupt.is_set() || !ctx.generating.load(Ordering::SeqCst) {
            content.push_str(INTERRUPTED_SUFFIX);
            interrupted = true;
            handle.abort();
            break;
        }
        ctx.events.emit(SessionEvent::GenerationProgress {
            token: token.clone(),
        });
        content.push_str(&token);

        // A completed block mid-stream means the model has something to run;
        // waiting for the rest wastes tokens and confuses later tool output.
        if cfg.break_on_tooluse && token.contains('\n') {
            let complete = parse_tool_uses(&content, cfg.tool_format, true, &ctx.tools);
            if !complete.is_empty() {
                handle.abort();
                break;
            }
        }
    }

    let usage = match handle.await {
        Ok(Ok(usage)) => Some(usage),
        Ok(Err(e)) => {
            if content.is_empty() {
                return Err(e.into());
            }
            // Persist what streamed before failing; the log stays honest.
            tracing::warn!("stream failed after partial output: {}", e);
            content.push_str(INTERRUPTED_SUFFIX);
            interrupted = true;
            None
        }
        Err(join) => {
            if !join.is_cancelled() {
                return Err(StepError::Provider(ProviderError::Stream(join.to_string())));
            }
            None // aborted by interrupt or tool-break
        }
    };

    Ok((content, usage, interrupted))
}

/// Executes a confirmed (or auto-confirmed) pending tool: appends every
/// message it yields, then leaves the caller to start the next step.
pub async fn execute_tool(
    log: &mut ConversationLog,
    ctx: &StepContext,
    cfg: &StepConfig,
    tool_id: &str,
) -> Result<(), StepError> {
    let Some((_, mut entry)) = ctx.pending_tools.remove(tool_id) else {
        return Err(StepError::UnknownTool(tool_id.to_string()));
    };
    entry.status = ToolStatus::Executing;
    ctx.events.emit(SessionEvent::ToolExecuting {
        tool_id: tool_id.to_string(),
    });

    for m in ctx
        .hooks
        .trigger(
            ctx.hook_ctx(HookType::ToolPreExecute, log, cfg)
                .with_data(entry.tooluse.to_json()),
        )
        .await?
    {
        append_and_event(log, ctx, m)?;
    }

    let spec = ctx
        .tools
        .get(&entry.tooluse.tool)
        .ok_or_else(|| ToolError::NotFound(entry.tooluse.tool.clone()))?;
    let exec_ctx = ExecContext::new(cfg.workspace.clone(), log.dir().to_path_buf())
        .with_interrupt(ctx.interrupt.clone());

    let result = {
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let fut = spec.executor.execute(&entry.tooluse, &exec_ctx, &tx);
        tokio::pin!(fut);
        let result = loop {
            tokio::select! {
                maybe = rx.recv() => {
                    if let Some(m) = maybe {
                        append_and_event(log, ctx, finish_tool_message(m, &entry, cfg))?;
                    }
                }
                res = &mut fut => break res,
            }
        };
        while let Ok(m) = rx.try_recv() {
            append_and_event(log, ctx, finish_tool_message(m, &entry, cfg))?;
        }
        result
    };

    match result {
        Ok(()) => {
            // Burn one auto-confirmation if the user granted a budget.
            let _ = ctx.auto_confirm_count.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |n| (n > 0).then(|| n - 1),
            );
        }
        Err(e) => {
            tracing::warn!("tool {} failed: {}", entry.tooluse.tool, e);
            let mut error_message = Message::system(format!("Error: {e}"));
            if let Some(call_id) = &entry.tooluse.call_id {
                error_message = error_message.with_call_id(call_id.clone());
            }
            append_and_event(log, ctx, error_message)?;
        }
    }

    for m in ctx
        .hooks
        .trigger(
            ctx.hook_ctx(HookType::ToolPostExecute, log, cfg)
                .with_data(entry.tooluse.to_json()),
        )
        .await?
    {
        append_and_event(log, ctx, m)?;
    }

    Ok(())
}

/// Tool output carries `role=system` (or `role=tool` in native format) and
/// the invocation's call id.
fn finish_tool_message(mut m: Message, entry: &ToolExecution, cfg: &StepConfig) -> Message {
    if cfg.tool_format == ToolFormatName::Tool {
        m.role = Role::Tool;
    }
    if m.call_id.is_none() {
        m.call_id = entry.tooluse.call_id.clone();
    }
    m
}

/// Records a skipped tool and appends the marker message.
pub fn skip_tool(
    log: &mut ConversationLog,
    ctx: &StepContext,
    tool_id: &str,
) -> Result<(), StepError> {
    let Some((_, _entry)) = ctx.pending_tools.remove(tool_id) else {
        return Err(StepError::UnknownTool(tool_id.to_string()));
    };
    append_and_event(log, ctx, Message::system(format!("Skipped tool {tool_id}")))
}

/// Replaces a pending tool's content with a user-edited version and marks the
/// edit in the log.
pub fn edit_tool(
    log: &mut ConversationLog,
    ctx: &StepContext,
    tool_id: &str,
    content: String,
) -> Result<(), StepError> {
    let Some(mut entry) = ctx.pending_tools.get_mut(tool_id) else {
        return Err(StepError::UnknownTool(tool_id.to_string()));
    };
    entry.tooluse.content = content;
    let call_id = entry.tooluse.call_id.clone();
    drop(entry);

    let mut marker = Message::system("(Modified by user)");
    if let Some(call_id) = call_id {
        marker = marker.with_call_id(call_id);
    }
    append_and_event(log, ctx, marker)
}

/// The generate-execute ping-pong: steps until a step yields no runnable
/// auto-confirmed tools, or a hook ends the session.
pub async fn run_step_loop(
    log: &mut ConversationLog,
    ctx: &StepContext,
    cfg: &StepConfig,
) -> Result<(), StepError> {
    loop {
        let outcome = match step(log, ctx, cfg).await {
            Ok(outcome) => outcome,
            Err(StepError::Hook(HookError::SessionComplete(reason))) => {
                tracing::info!("session complete: {}", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if outcome.interrupted {
            return Ok(());
        }

        let auto_ids: Vec<String> = outcome
            .pending
            .iter()
            .filter(|id| {
                ctx.pending_tools
                    .get(id.as_str())
                    .map(|e| e.auto_confirm)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if auto_ids.is_empty() {
            // done, or waiting for an external confirmation
            return Ok(());
        }

        for tool_id in auto_ids {
            execute_tool(log, ctx, cfg, &tool_id).await?;
            if ctx.interrupt.is_set() {
                return Ok(());
            }
        }

        match ctx
            .hooks
            .trigger(ctx.hook_ctx(HookType::LoopContinue, log, cfg))
            .await
        {
            Ok(yielded) => {
                for m in yielded {
                    append_and_event(log, ctx, m)?;
                }
            }
            Err(HookError::SessionComplete(reason)) => {
                tracing::info!("session complete: {}", reason);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Crash recovery: a log whose last message is from the user means the
/// previous run died before replying; generation should resume immediately.
/// An `Interrupted by user` sentinel means the user gets prompted instead.
pub fn needs_resume(messages: &[Message]) -> bool {
    match messages.last() {
        Some(m) if m.role == Role::User => true,
        Some(m) if m.role == Role::System && m.content == INTERRUPTED_SENTINEL => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::collector;
    use crate::llm::{MockProvider, MockScript, Usage};
    use crate::store::LogOptions;
    use crate::tools::{ShellTool, ToolRegistry};
    use std::sync::Mutex;

    fn test_registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(ShellTool::spec()).unwrap();
        Arc::new(registry)
    }

    fn open_log(dir: &std::path::Path) -> ConversationLog {
        let mut log = ConversationLog::open(
            dir,
            LogOptions {
                create: true,
                ..LogOptions::default()
            },
        )
        .unwrap();
        log.append(Message::system("You are a helpful assistant."))
            .unwrap();
        // Named up front so background auto-naming stays out of these tests.
        let mut config = env_config::ChatConfig::new();
        config.name = Some("test conversation".to_string());
        config.save(dir).unwrap();
        log
    }

    fn ctx_with(
        provider: MockProvider,
        events: EventSink,
    ) -> StepContext {
        let mut ctx = StepContext::new("abc", Arc::new(provider), test_registry());
        ctx.events = events;
        ctx.retry = RetryPolicy::new(std::time::Duration::from_millis(1), 5);
        ctx
    }

    fn event_types(events: &Mutex<Vec<SessionEvent>>) -> Vec<String> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.type_name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("hello")).unwrap();

        let (sink, events) = collector();
        let ctx = ctx_with(MockProvider::replying("Hi!"), sink);
        let cfg = StepConfig::new("local/test");

        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();
        assert!(outcome.pending.is_empty());
        assert!(!outcome.interrupted);

        let types = event_types(&events);
        assert_eq!(
            types,
            vec![
                "generation_started",
                "generation_progress",
                "generation_progress",
                "generation_progress",
                "generation_complete",
            ]
        );

        // token concatenation equals the final content
        let events = events.lock().unwrap();
        let mut streamed = String::new();
        for e in events.iter() {
            if let SessionEvent::GenerationProgress { token } = e {
                streamed.push_str(token);
            }
        }
        assert_eq!(streamed, "Hi!");

        let roles: Vec<Role> = log.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(log.messages()[2].content, "Hi!");
        assert!(ctx.pending_tools.is_empty());
        assert!(!ctx.generating.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tool_block_becomes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("list files")).unwrap();

        let (sink, events) = collector();
        let ctx = ctx_with(
            MockProvider::replying("Listing:\n```shell\nls\n```\n"),
            sink,
        );
        let cfg = StepConfig::new("local/test");

        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();
        assert_eq!(outcome.pending.len(), 1);

        let pending = ctx.pending_tools.get(&outcome.pending[0]).unwrap();
        assert_eq!(pending.tooluse.tool, "shell");
        assert_eq!(pending.tooluse.content, "ls");
        assert!(!pending.auto_confirm);

        let types = event_types(&events);
        assert_eq!(types.last().map(String::as_str), Some("tool_pending"));
        // tool_pending never reorders before generation_complete
        let complete_at = types.iter().position(|t| t == "generation_complete").unwrap();
        let pending_at = types.iter().position(|t| t == "tool_pending").unwrap();
        assert!(complete_at < pending_at);
    }

    #[tokio::test]
    async fn reparse_matches_pending_multiset() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("go")).unwrap();

        let (sink, _events) = collector();
        let ctx = ctx_with(
            MockProvider::replying("```shell\nls\n```\n\nthen\n```shell\npwd\n```\n"),
            sink,
        );
        let mut cfg = StepConfig::new("local/test");
        cfg.break_on_tooluse = false; // let the whole message stream in

        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();
        let reparsed = parse_tool_uses(
            &outcome.message.unwrap().content,
            cfg.tool_format,
            false,
            &ctx.tools,
        );
        let mut reported: Vec<ToolUse> = outcome
            .pending
            .iter()
            .map(|id| ctx.pending_tools.get(id).unwrap().tooluse.clone())
            .collect();
        reported.sort_by(|a, b| a.content.cmp(&b.content));
        let mut reparsed = reparsed;
        reparsed.sort_by(|a, b| a.content.cmp(&b.content));
        assert_eq!(reported, reparsed);
    }

    #[tokio::test]
    async fn auto_confirm_executes_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("list files")).unwrap();

        let (sink, events) = collector();
        let provider = MockProvider::new(vec![
            MockScript::text("Listing:\n```shell\nls\n```\n"),
            MockScript::text("Done."),
        ]);
        let mut ctx = ctx_with(provider, sink);
        let mut cfg = StepConfig::new("local/test");
        cfg.auto_confirm = true;
        cfg.workspace = dir.path().to_path_buf();
        ctx.conversation_id = "t1".to_string();

        run_step_loop(&mut log, &ctx, &cfg).await.unwrap();

        // tool output landed between the two assistant messages
        let roles: Vec<Role> = log.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::System,
                Role::Assistant
            ]
        );
        assert!(log.messages()[3].content.contains("marker.txt"));
        assert_eq!(log.messages()[4].content, "Done.");

        let types = event_types(&events);
        let executing_at = types.iter().position(|t| t == "tool_executing").unwrap();
        let second_start = types
            .iter()
            .enumerate()
            .filter(|(_, t)| *t == "generation_started")
            .map(|(i, _)| i)
            .nth(1)
            .unwrap();
        assert!(executing_at < second_start, "auto-continuation after tool");
        assert!(ctx.pending_tools.is_empty());
    }

    #[tokio::test]
    async fn interruption_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("write a poem")).unwrap();

        let long_text = "token ".repeat(50);
        let (raw_sink, events) = collector();
        // Interrupt the session after the fifth progress event.
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let interrupt = Interrupt::new();
        let interrupt2 = interrupt.clone();
        let count2 = count.clone();
        let sink = EventSink::new(move |ev| {
            if matches!(ev, SessionEvent::GenerationProgress { .. }) {
                let n = count2.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 5 {
                    interrupt2.set();
                }
            }
            raw_sink.emit(ev);
        });

        let mut ctx = ctx_with(MockProvider::replying(&long_text), sink);
        ctx.interrupt = interrupt;
        let cfg = StepConfig::new("local/test");

        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();
        assert!(outcome.interrupted);

        let assistant = &log.messages()[log.messages().len() - 2];
        assert_eq!(assistant.role, Role::Assistant);
        assert!(assistant.content.ends_with(INTERRUPTED_SUFFIX));
        assert_eq!(log.messages().last().unwrap().content, INTERRUPTED_SENTINEL);

        let types = event_types(&events);
        assert!(types.contains(&"interrupted".to_string()));
        assert!(ctx.pending_tools.is_empty());
        assert!(!ctx.generating.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn retry_before_yield_invokes_stream_four_times() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("hello")).unwrap();

        let (sink, events) = collector();
        let ctx = ctx_with(MockProvider::replying("Hi!").failing_first(3), sink);
        let cfg = StepConfig::new("local/test");

        step(&mut log, &ctx, &cfg).await.unwrap();

        // consumer saw each token exactly once
        let events = events.lock().unwrap();
        let tokens: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::GenerationProgress { token } => Some(token.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec!["H", "i", "!"]);
    }

    #[tokio::test]
    async fn concurrent_step_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("hello")).unwrap();

        let (sink, _) = collector();
        let ctx = ctx_with(MockProvider::replying("Hi!"), sink);
        ctx.generating.store(true, Ordering::SeqCst);
        let cfg = StepConfig::new("local/test");
        let err = step(&mut log, &ctx, &cfg).await.unwrap_err();
        assert!(matches!(err, StepError::Busy));
    }

    #[tokio::test]
    async fn tool_failure_appends_error_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("run")).unwrap();

        let (sink, _) = collector();
        let ctx = ctx_with(MockProvider::replying("```shell\n   \n```\n"), sink);
        let cfg = StepConfig::new("local/test");

        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();
        execute_tool(&mut log, &ctx, &cfg, &outcome.pending[0])
            .await
            .unwrap();
        let last = log.messages().last().unwrap();
        assert!(last.content.starts_with("Error:"));
        assert_eq!(last.role, Role::System);
    }

    #[tokio::test]
    async fn skip_tool_appends_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("run")).unwrap();

        let (sink, _) = collector();
        let ctx = ctx_with(MockProvider::replying("```shell\nls\n```\n"), sink);
        let cfg = StepConfig::new("local/test");
        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();

        skip_tool(&mut log, &ctx, &outcome.pending[0]).unwrap();
        assert!(log
            .messages()
            .last()
            .unwrap()
            .content
            .starts_with("Skipped tool "));
        assert!(ctx.pending_tools.is_empty());
    }

    #[tokio::test]
    async fn edit_tool_swaps_content_and_marks_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("run")).unwrap();

        let (sink, _) = collector();
        let ctx = ctx_with(MockProvider::replying("```shell\nrm -rf /\n```\n"), sink);
        let cfg = StepConfig::new("local/test");
        let outcome = step(&mut log, &ctx, &cfg).await.unwrap();

        edit_tool(&mut log, &ctx, &outcome.pending[0], "echo safe".to_string()).unwrap();
        assert_eq!(
            ctx.pending_tools.get(&outcome.pending[0]).unwrap().tooluse.content,
            "echo safe"
        );
        assert_eq!(log.messages().last().unwrap().content, "(Modified by user)");
    }

    #[tokio::test]
    async fn auto_confirm_count_decrements_per_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("go")).unwrap();

        let (sink, _) = collector();
        let provider = MockProvider::new(vec![
            MockScript::text("```shell\ntrue\n```\n"),
            MockScript::text("done"),
        ]);
        let ctx = ctx_with(provider, sink);
        ctx.auto_confirm_count.store(2, Ordering::SeqCst);
        let mut cfg = StepConfig::new("local/test");
        cfg.workspace = dir.path().to_path_buf();

        run_step_loop(&mut log, &ctx, &cfg).await.unwrap();
        assert_eq!(ctx.auto_confirm_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_complete_hook_ends_loop_cleanly() {
        use crate::hooks::hook_fn;

        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("go")).unwrap();

        let (sink, _) = collector();
        let provider = MockProvider::new(vec![
            MockScript::text("```shell\ntrue\n```\n"),
            MockScript::text("never reached"),
        ]);
        let mut cfg = StepConfig::new("local/test");
        cfg.auto_confirm = true;
        cfg.workspace = dir.path().to_path_buf();
        let ctx = ctx_with(provider, sink);
        ctx.hooks.register(
            "stop-after-tool",
            HookType::LoopContinue,
            0,
            hook_fn(|_| async { Err(HookError::SessionComplete("done".to_string())) }),
        );

        run_step_loop(&mut log, &ctx, &cfg).await.unwrap();
        // second generation never happened
        let assistants = log
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        assert_eq!(assistants, 1);
    }

    #[tokio::test]
    async fn auto_naming_fires_config_changed_once() {
        let dir = tempfile::tempdir().unwrap();
        // no chat config on disk: the conversation is unnamed
        let mut log = ConversationLog::open(
            dir.path(),
            LogOptions {
                create: true,
                ..LogOptions::default()
            },
        )
        .unwrap();
        log.append(Message::system("sys")).unwrap();
        log.append(Message::user("list files please")).unwrap();

        let (sink, events) = collector();
        let provider = MockProvider::new(vec![
            MockScript::text("Sure."),
            MockScript::text("Listing files"), // naming reply
            MockScript::text("Anything else?"),
        ]);
        let ctx = ctx_with(provider, sink);
        let cfg = StepConfig::new("local/test");

        step(&mut log, &ctx, &cfg).await.unwrap();

        // the naming task runs in the background; wait for its event
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let changed = loop {
            let found = events.lock().unwrap().iter().any(|e| {
                matches!(e, SessionEvent::ConfigChanged { changed_fields, .. }
                    if changed_fields == &vec!["name".to_string()])
            });
            if found {
                break true;
            }
            if std::time::Instant::now() > deadline {
                break false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert!(changed, "config_changed with name never fired");

        let config = env_config::ChatConfig::load(dir.path()).unwrap();
        let name = config.name.unwrap();
        assert!(!name.is_empty() && name.len() <= 50);

        // a second reply must not rename
        let before = events.lock().unwrap().len();
        log.append(Message::user("more")).unwrap();
        step(&mut log, &ctx, &cfg).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let renames_after = events.lock().unwrap()[before..]
            .iter()
            .filter(|e| matches!(e, SessionEvent::ConfigChanged { .. }))
            .count();
        assert_eq!(renames_after, 0);
    }

    #[test]
    fn crash_recovery_rules() {
        let user_last = vec![Message::system("s"), Message::user("u")];
        assert!(needs_resume(&user_last));

        let interrupted = vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant("partial [INTERRUPTED]"),
            Message::system(INTERRUPTED_SENTINEL),
        ];
        assert!(!needs_resume(&interrupted));

        let answered = vec![Message::user("u"), Message::assistant("a")];
        assert!(!needs_resume(&answered));
    }

    #[tokio::test]
    async fn usage_metadata_attached_with_cost() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_log(dir.path());
        log.append(Message::user("hello")).unwrap();

        let (sink, _) = collector();
        let script = MockScript::text("Hi!").with_usage(Usage {
            input_tokens: 100,
            output_tokens: 3,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            total_tokens: Some(103),
        });
        let ctx = ctx_with(MockProvider::new(vec![script]), sink);
        let cfg = StepConfig::new("local/test");

        step(&mut log, &ctx, &cfg).await.unwrap();
        let metadata = log.messages().last().unwrap().metadata.as_ref().unwrap();
        assert_eq!(metadata.input_tokens, 100);
        assert_eq!(metadata.total_tokens, Some(103));
        assert_eq!(
            metadata.total_tokens.unwrap(),
            metadata.input_tokens
                + metadata.output_tokens
                + metadata.cache_read_tokens
                + metadata.cache_creation_tokens
        );
        assert_eq!(ctx.costs.summary().request_count, 1);
    }
}
