//! # Weft
//!
//! An agent orchestration core: accept a user prompt, stream a response from
//! one of several LLM providers, detect tool invocations embedded in it,
//! execute them (with optional confirmation), feed the results back as
//! context, and repeat until the model yields no more runnable tools.
//!
//! ## Design principles
//!
//! - **One step per iteration**: [`step`] runs exactly one generate-then-detect
//!   pass; [`run_step_loop`] chains steps into the agent ping-pong.
//! - **Flat text is the common currency**: native tool calls and reasoning
//!   blocks are flattened into the token stream (`@name(id): {...}` markers,
//!   `<think>` sentinels), so the parser and log never care which wire
//!   protocol produced them.
//! - **The log is the source of truth**: every message is persisted before
//!   its event is published; tool uses are re-parsed from content, never
//!   stored.
//!
//! ## Main modules
//!
//! - [`message`]: [`Message`], [`Role`], [`FileRef`], [`UsageMetadata`].
//! - [`store`]: [`ConversationLog`] (JSONL, branches, advisory lock),
//!   [`prepare_messages`] for model input.
//! - [`models`]: [`Provider`], [`ModelMeta`], pricing and resolution.
//! - [`llm`]: [`ProviderClient`] trait, [`OpenAiFamily`], [`AnthropicFamily`],
//!   [`MockProvider`], retry policies.
//! - [`tools`]: [`ToolRegistry`], [`ToolSpec`], the three-format parser,
//!   execution contract.
//! - [`step`]: the step engine, pending-tool table, interruption, recovery.
//! - [`hooks`]: [`HookBus`] and the built-in cost/token awareness hooks.
//! - [`costs`]: [`SessionCosts`] accounting.
//!
//! The serving layer (HTTP/SSE sessions) lives in the `serve` crate; the
//! terminal front-end in `weft-cli`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft::{
//!     run_step_loop, ConversationLog, LogOptions, Message, MockProvider, StepConfig,
//!     StepContext, ToolRegistry,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), weft::StepError> {
//! let mut log = ConversationLog::open(
//!     "/tmp/demo-conversation",
//!     LogOptions { create: true, ..LogOptions::default() },
//! )?;
//! log.append(Message::system("You are a helpful assistant."))?;
//! log.append(Message::user("hello"))?;
//!
//! let provider = Arc::new(MockProvider::replying("Hi!"));
//! let tools = Arc::new(ToolRegistry::with_builtin());
//! let ctx = StepContext::new("demo", provider, tools);
//! let cfg = StepConfig::new("local/test");
//!
//! run_step_loop(&mut log, &ctx, &cfg).await?;
//! # Ok(())
//! # }
//! ```

pub mod costs;
pub mod events;
pub mod hooks;
pub mod interrupt;
pub mod llm;
pub mod message;
pub mod models;
pub mod naming;
pub mod prompts;
pub mod step;
pub mod store;
pub mod tools;

pub use costs::{crossed_thresholds, CostEntry, CostSummary, SessionCosts};
pub use events::EventSink;
pub use hooks::{
    hook_fn, CostAwareness, HookBus, HookContext, HookError, HookOutput, HookType, TokenAwareness,
};
pub use interrupt::Interrupt;
pub use llm::{
    client_for, extract_think, resolve_endpoint, AnthropicFamily, CacheStrategy, ChatRequest,
    FourBreakpointStrategy, MockProvider, OpenAiFamily, ProviderClient, ProviderError, Usage,
};
pub use llm::retry::RetryPolicy;
pub use message::{FileRef, Message, Role, UsageMetadata};
pub use models::{
    compute_cost, default_model_from_env, get_model, split_model_string, ModelMeta, Provider,
};
pub use naming::{generate_name, sanitize_name, spawn_auto_name};
pub use prompts::{assemble_system_prompt, BASE_PROMPT};
pub use step::{
    edit_tool, execute_tool, needs_resume, run_step_loop, skip_tool, step, StepConfig,
    StepContext, StepError, StepOutcome, ToolExecution, ToolStatus, INTERRUPTED_SENTINEL,
    INTERRUPTED_SUFFIX,
};
pub use store::{
    list_conversations, logs_home, prepare_messages, trim_messages, ConversationLog,
    ConversationMeta, LogOptions, PrepareOptions, StoreError, Summarizer,
};
pub use tools::{
    parse_tool_uses, ExecContext, ShellTool, ToolError, ToolFormatName, ToolRegistry, ToolSpec,
    ToolUse,
};

// Re-export the config crate types callers need alongside the core.
pub use env_config::{ChatConfig, McpConfig, McpServerConfig, ProjectConfig, UserConfig};
