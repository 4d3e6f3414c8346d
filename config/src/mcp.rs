//! MCP server configuration tables, shared by chat and project config.
//!
//! Servers are configured but not dialed here; the tool layer decides what to
//! do with them. A server is stdio-launched (`command` + `args`) or HTTP
//! (`url` + `headers`), never both.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `[mcp]` table: global enable flag plus server list.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<McpServerConfig>,
}

/// One `[[mcp.servers]]` entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Stdio transport: executable to spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// HTTP transport: endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl McpServerConfig {
    /// True when the entry describes an HTTP server rather than a stdio one.
    pub fn is_http(&self) -> bool {
        self.url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_and_http_servers() {
        let cfg: McpConfig = toml::from_str(
            r#"
enabled = true

[[servers]]
name = "files"
command = "mcp-files"
args = ["--root", "/tmp"]

[[servers]]
name = "remote"
url = "https://mcp.example.com"
[servers.headers]
Authorization = "Bearer x"
"#,
        )
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.servers.len(), 2);
        assert!(!cfg.servers[0].is_http());
        assert!(cfg.servers[0].enabled, "enabled defaults to true");
        assert!(cfg.servers[1].is_http());
        assert_eq!(
            cfg.servers[1].headers.get("Authorization").map(String::as_str),
            Some("Bearer x")
        );
    }
}
