//! User config: `~/.config/weft/config.toml` (honors `XDG_CONFIG_HOME`).
//!
//! `[prompt]` personalizes the system prompt, `[env]` feeds `load_and_apply`,
//! and `[[providers]]` declares custom OpenAI-compatible endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

/// `[prompt]` table: user-level prompt personalization.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_preference: Option<String>,
    /// Per-project notes keyed by project name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub project: HashMap<String, String>,
}

/// One `[[providers]]` entry: a custom OpenAI-compatible endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Inline key; prefer `api_key_env` to keep secrets out of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl CustomProviderConfig {
    /// Resolves the API key: inline value, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref k) = self.api_key {
            return Some(k.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<CustomProviderConfig>,
}

fn user_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or_else(|| LoadError::ConfigPath("no user config directory".to_string()))?,
    };
    let path = config_dir.join(app_name).join("config.toml");
    if path.exists() {
        Ok(Some(path))
    } else {
        Ok(None)
    }
}

impl UserConfig {
    /// Loads the user config; a missing file yields the default.
    pub fn load(app_name: &str) -> Result<Self, LoadError> {
        let path = match user_config_path(app_name)? {
            Some(p) => p,
            None => return Ok(Self::default()),
        };
        let content = std::fs::read_to_string(&path).map_err(LoadError::Read)?;
        Ok(toml::from_str(&content)?)
    }

    /// Finds a custom provider by name.
    pub fn provider(&self, name: &str) -> Option<&CustomProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Returns env key-value pairs from the `[env]` section. Missing file or empty
/// section returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    Ok(UserConfig::load(app_name)?.env)
}
