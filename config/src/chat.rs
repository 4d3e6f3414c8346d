//! Per-conversation chat config: `config.toml` inside the conversation log directory.
//!
//! Read on every step (the server PATCHes it live); written back whole on change.
//! The `[chat]` table carries the knobs the step engine needs; `[env]` and `[mcp]`
//! ride along for tools.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{LoadError, McpConfig};

pub const CHAT_CONFIG_FILENAME: &str = "config.toml";

/// Tool-use syntax the conversation runs with. Exactly one is active.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolFormatName {
    #[default]
    Markdown,
    Xml,
    Tool,
}

impl std::str::FromStr for ToolFormatName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" => Ok(Self::Markdown),
            "xml" => Ok(Self::Xml),
            "tool" => Ok(Self::Tool),
            _ => Err(format!(
                "unknown tool_format: {} (use markdown, xml, or tool)",
                s
            )),
        }
    }
}

impl std::fmt::Display for ToolFormatName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Markdown => "markdown",
            Self::Xml => "xml",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
struct ChatConfigFile {
    #[serde(default)]
    chat: ChatTable,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "is_default_mcp")]
    mcp: McpConfig,
}

fn is_default_mcp(m: &McpConfig) -> bool {
    *m == McpConfig::default()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
struct ChatTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<String>>,
    #[serde(default)]
    tool_format: ToolFormatName,
    #[serde(default = "default_true")]
    stream: bool,
    #[serde(default = "default_true")]
    interactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// Chat config with flat accessors; stored under `[chat]` on disk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatConfig {
    /// Display name; set by the user or by auto-naming.
    pub name: Option<String>,
    /// Qualified `provider/model` string, or bare provider.
    pub model: Option<String>,
    /// Tool allowlist; `None` means all registered tools.
    pub tools: Option<Vec<String>>,
    pub tool_format: ToolFormatName,
    pub stream: bool,
    pub interactive: bool,
    pub workspace: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub mcp: McpConfig,
}

impl ChatConfig {
    pub fn new() -> Self {
        Self {
            stream: true,
            interactive: true,
            ..Self::default()
        }
    }

    /// Loads from `<logdir>/config.toml`. A missing file yields the default config.
    pub fn load(logdir: &Path) -> Result<Self, LoadError> {
        let path = logdir.join(CHAT_CONFIG_FILENAME);
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(&path).map_err(LoadError::Read)?;
        let file: ChatConfigFile = toml::from_str(&content)?;
        Ok(Self {
            name: file.chat.name,
            model: file.chat.model,
            tools: file.chat.tools,
            tool_format: file.chat.tool_format,
            stream: file.chat.stream,
            interactive: file.chat.interactive,
            workspace: file.chat.workspace,
            env: file.env,
            mcp: file.mcp,
        })
    }

    /// Writes the whole config back to `<logdir>/config.toml`.
    pub fn save(&self, logdir: &Path) -> Result<(), LoadError> {
        let file = ChatConfigFile {
            chat: ChatTable {
                name: self.name.clone(),
                model: self.model.clone(),
                tools: self.tools.clone(),
                tool_format: self.tool_format,
                stream: self.stream,
                interactive: self.interactive,
                workspace: self.workspace.clone(),
            },
            env: self.env.clone(),
            mcp: self.mcp.clone(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(logdir.join(CHAT_CONFIG_FILENAME), content).map_err(LoadError::Write)
    }

    /// Applies a JSON patch of `[chat]` fields, returning which fields changed.
    /// Unknown keys are ignored; `null` clears an optional field.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) -> Vec<String> {
        let mut changed = Vec::new();
        let Some(obj) = patch.as_object() else {
            return changed;
        };
        for (key, value) in obj {
            let did = match key.as_str() {
                "name" => set_opt_string(&mut self.name, value),
                "model" => set_opt_string(&mut self.model, value),
                "tools" => {
                    if value.is_null() {
                        let did = self.tools.is_some();
                        self.tools = None;
                        did
                    } else if let Some(items) = value.as_array() {
                        let next = Some(
                            items
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect::<Vec<_>>(),
                        );
                        let did = next != self.tools;
                        self.tools = next;
                        did
                    } else {
                        false
                    }
                }
                "tool_format" => {
                    if let Some(s) = value.as_str() {
                        if let Ok(fmt) = s.parse::<ToolFormatName>() {
                            let did = fmt != self.tool_format;
                            self.tool_format = fmt;
                            did
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                }
                "stream" => set_bool(&mut self.stream, value),
                "interactive" => set_bool(&mut self.interactive, value),
                "workspace" => {
                    if value.is_null() {
                        let did = self.workspace.is_some();
                        self.workspace = None;
                        did
                    } else if let Some(s) = value.as_str() {
                        let next = Some(PathBuf::from(s));
                        let did = next != self.workspace;
                        self.workspace = next;
                        did
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if did {
                changed.push(key.clone());
            }
        }
        changed
    }

    /// JSON view used by the config endpoints and `config_changed` events.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "model": self.model,
            "tools": self.tools,
            "tool_format": self.tool_format.to_string(),
            "stream": self.stream,
            "interactive": self.interactive,
            "workspace": self.workspace,
        })
    }
}

fn set_opt_string(slot: &mut Option<String>, value: &serde_json::Value) -> bool {
    if value.is_null() {
        let did = slot.is_some();
        *slot = None;
        did
    } else if let Some(s) = value.as_str() {
        let next = Some(s.to_string());
        let did = next != *slot;
        *slot = next;
        did
    } else {
        false
    }
}

fn set_bool(slot: &mut bool, value: &serde_json::Value) -> bool {
    if let Some(b) = value.as_bool() {
        let did = b != *slot;
        *slot = b;
        did
    } else {
        false
    }
}
