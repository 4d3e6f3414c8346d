//! Project config: `weft.toml` at the workspace root (or `.github/weft.toml`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{LoadError, McpConfig};

/// Project-level configuration found in the workspace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Replaces the built-in base system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_prompt: Option<String>,
    /// Appended project-specific prompt fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Globs of files to include as conversation context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Command whose output is appended as context (run in the workspace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_cmd: Option<String>,
    /// Retrieval-augmentation table; opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag: Option<toml::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfig>,
    /// `[agent.name]` and friends; opaque agent identity table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<toml::Value>,
}

impl ProjectConfig {
    /// Candidate paths relative to a workspace root, in priority order.
    fn candidates(workspace: &Path) -> [PathBuf; 2] {
        [
            workspace.join("weft.toml"),
            workspace.join(".github").join("weft.toml"),
        ]
    }

    /// Loads the project config for a workspace; `None` when no file exists.
    pub fn load(workspace: &Path) -> Result<Option<Self>, LoadError> {
        for path in Self::candidates(workspace) {
            if path.is_file() {
                let content = std::fs::read_to_string(&path).map_err(LoadError::Read)?;
                return Ok(Some(toml::from_str(&content)?));
            }
        }
        Ok(None)
    }
}
