//! Load configuration for Weft from user `config.toml`, project `weft.toml`,
//! per-conversation chat `config.toml`, and `.env`, then apply `[env]` tables to the
//! process environment with priority: **existing env > .env > user config**.
//!
//! Three config layers, smallest scope last:
//!
//! - **User** (`~/.config/weft/config.toml`): `[prompt]` (about_user,
//!   response_preference, per-project notes), `[env]`, and `[[providers]]`
//!   (custom OpenAI-compatible endpoints).
//! - **Project** (`weft.toml` at the workspace root, or `.github/weft.toml`):
//!   base prompt, prompt fragment, context files/command, `[env]`, `[mcp]`.
//! - **Chat** (`config.toml` in the conversation log directory): name, model,
//!   tools, tool_format, stream, interactive, workspace, plus `[env]` and `[mcp]`.

mod chat;
mod dotenv;
mod mcp;
mod project;
mod user;

use std::path::Path;
use thiserror::Error;

pub use chat::{ChatConfig, ToolFormatName, CHAT_CONFIG_FILENAME};
pub use mcp::{McpConfig, McpServerConfig};
pub use project::ProjectConfig;
pub use user::{CustomProviderConfig, PromptConfig, UserConfig};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("config path: {0}")]
    ConfigPath(String),
    #[error("read config: {0}")]
    Read(std::io::Error),
    #[error("write config: {0}")]
    Write(std::io::Error),
    #[error("parse toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize toml: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads the user config `[env]` table and the optional project `.env`, then sets
/// environment variables only for keys that are **not** already set (so existing
/// env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `~/.config/<app_name>/config.toml` `[env]` table
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let user_map = user::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = user_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(&key).or_else(|| user_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}
