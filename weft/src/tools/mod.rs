//! Tool registry and tool-use protocol.
//!
//! Tools register a [`ToolSpec`] (name, schema, executor, block-tag aliases)
//! in a [`ToolRegistry`]; the parser in [`parse`] scans model output for
//! invocations in any of the three formats and resolves them against the
//! registry. Execution goes through the contract in [`exec`].
//!
//! The server and CLI share one process-wide registry via [`global`]; tests
//! build their own so they never race on shared state.

pub mod exec;
pub mod parse;
mod shell;

pub use exec::{always_confirm, ConfirmFn, ExecContext, ToolExecutor};
pub use parse::{parse_tool_uses, ToolFormatName, ToolUse};
pub use shell::ShellTool;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("tool {0} is not available on this system")]
    Unavailable(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interrupted")]
    Interrupted,
}

/// One parameter of a tool, for schema generation and prompting.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ToolParam {
    pub name: String,
    pub r#type: String,
    pub description: String,
    pub required: bool,
}

impl ToolParam {
    pub fn new(name: &str, r#type: &str, description: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            r#type: r#type.to_string(),
            description: description.to_string(),
            required,
        }
    }
}

/// Immutable specification of one tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Prompt fragment describing usage to the model.
    pub instructions: String,
    pub parameters: Vec<ToolParam>,
    /// Aliases under which the tool may appear in markdown/xml blocks.
    pub block_types: Vec<String>,
    pub executor: Arc<dyn ToolExecutor>,
    /// Result of the availability predicate, checked at registration.
    pub available: bool,
    /// Sourced from an external MCP server rather than built in.
    pub is_mcp: bool,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let name = name.into();
        Self {
            block_types: vec![name.clone()],
            name,
            description: description.into(),
            instructions: String::new(),
            parameters: Vec::new(),
            executor,
            available: true,
            is_mcp: false,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ToolParam>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_block_types(mut self, block_types: Vec<String>) -> Self {
        self.block_types = block_types;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn mcp(mut self) -> Self {
        self.is_mcp = true;
        self
    }

    /// JSON schema for the parameters, in the shape both provider families eat.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                serde_json::json!({"type": p.r#type, "description": p.description}),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("block_types", &self.block_types)
            .field("available", &self.available)
            .field("is_mcp", &self.is_mcp)
            .finish()
    }
}

/// Registry of tool specs keyed by name, with optional per-conversation scoping.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<ToolSpec>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools registered.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        if let Err(e) = registry.register(ShellTool::spec()) {
            tracing::warn!("builtin tool not registered: {}", e);
        }
        registry
    }

    /// Registers a tool; rejects it when its availability predicate failed.
    pub fn register(&self, spec: ToolSpec) -> Result<(), ToolError> {
        if !spec.available {
            return Err(ToolError::Unavailable(spec.name));
        }
        self.tools.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).map(|e| e.value().clone())
    }

    /// Resolves a markdown/xml block tag: tool name or any registered alias.
    pub fn resolve_block_tag(&self, tag: &str) -> Option<Arc<ToolSpec>> {
        if let Some(spec) = self.get(tag) {
            return Some(spec);
        }
        self.tools
            .iter()
            .find(|e| e.value().block_types.iter().any(|b| b == tag))
            .map(|e| e.value().clone())
    }

    /// All registered tools, sorted by name.
    pub fn list(&self) -> Vec<Arc<ToolSpec>> {
        let mut tools: Vec<_> = self.tools.iter().map(|e| e.value().clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// A registry narrowed to an allowlist of tool names.
    pub fn scoped(&self, allowlist: &[String]) -> ToolRegistry {
        let scoped = ToolRegistry::new();
        for name in allowlist {
            if let Some(spec) = self.get(name) {
                scoped.tools.insert(spec.name.clone(), spec);
            }
        }
        scoped
    }

    /// Removes all tools sourced from MCP servers (server unloaded).
    pub fn remove_mcp_tools(&self) {
        self.tools.retain(|_, spec| !spec.is_mcp);
    }

    /// Combined instruction fragment for the system prompt.
    pub fn instructions(&self) -> String {
        let mut out = String::new();
        for spec in self.list() {
            if spec.instructions.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n\n{}\n\n", spec.name, spec.instructions));
        }
        out
    }
}

static GLOBAL: Lazy<Arc<ToolRegistry>> = Lazy::new(|| Arc::new(ToolRegistry::with_builtin()));

/// The process-wide registry used by the server and CLI.
pub fn global() -> Arc<ToolRegistry> {
    GLOBAL.clone()
}

#[cfg(test)]
impl ToolSpec {
    /// A no-op tool for parser and registry tests.
    pub(crate) fn echo_for_tests() -> ToolSpec {
        struct Echo;
        #[async_trait::async_trait]
        impl ToolExecutor for Echo {
            async fn execute(
                &self,
                inv: &ToolUse,
                _ctx: &ExecContext,
                out: &tokio::sync::mpsc::Sender<crate::message::Message>,
            ) -> Result<(), ToolError> {
                let _ = out
                    .send(crate::message::Message::system(format!(
                        "echo: {}",
                        inv.content
                    )))
                    .await;
                Ok(())
            }
        }
        ToolSpec::new("echo", "echoes its input", Arc::new(Echo))
    }

    pub(crate) fn named(mut self, name: &str) -> ToolSpec {
        self.name = name.to_string();
        self.block_types = vec![name.to_string()];
        self
    }
}
