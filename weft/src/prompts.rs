//! System-prompt assembly: base prompt + project context + user
//! personalization + tool instructions.
//!
//! Regenerated whenever the chat config changes (the server PATCH path
//! replaces the leading system message with the result).

use crate::tools::ToolRegistry;
use env_config::{ProjectConfig, UserConfig};

pub const BASE_PROMPT: &str = "You are weft, an agent that solves tasks by \
reasoning step by step and running tools on the user's machine. Prefer \
small, verifiable steps; show the tool invocation before relying on its \
output.";

/// Builds the full system prompt for a conversation.
pub fn assemble_system_prompt(
    project: Option<&ProjectConfig>,
    user: Option<&UserConfig>,
    tools: &ToolRegistry,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    let base = project
        .and_then(|p| p.base_prompt.clone())
        .unwrap_or_else(|| BASE_PROMPT.to_string());
    sections.push(base);

    if let Some(project) = project {
        if let Some(prompt) = &project.prompt {
            sections.push(format!("# Project\n\n{prompt}"));
        }
    }

    if let Some(user) = user {
        let mut about = String::new();
        if let Some(about_user) = &user.prompt.about_user {
            about.push_str(&format!("About the user: {about_user}\n"));
        }
        if let Some(pref) = &user.prompt.response_preference {
            about.push_str(&format!("Response preference: {pref}\n"));
        }
        if !about.is_empty() {
            sections.push(format!("# User\n\n{}", about.trim_end()));
        }
    }

    let instructions = tools.instructions();
    if !instructions.is_empty() {
        sections.push(format!("# Tools\n\n{}", instructions.trim_end()));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ShellTool, ToolRegistry};

    #[test]
    fn includes_tool_instructions() {
        let registry = ToolRegistry::new();
        registry.register(ShellTool::spec()).unwrap();
        let prompt = assemble_system_prompt(None, None, &registry);
        assert!(prompt.starts_with(BASE_PROMPT));
        assert!(prompt.contains("## shell"));
    }

    #[test]
    fn project_base_prompt_replaces_default() {
        let project = ProjectConfig {
            base_prompt: Some("You are the release bot.".to_string()),
            prompt: Some("This repo ships weekly.".to_string()),
            ..ProjectConfig::default()
        };
        let prompt = assemble_system_prompt(Some(&project), None, &ToolRegistry::new());
        assert!(prompt.starts_with("You are the release bot."));
        assert!(prompt.contains("This repo ships weekly."));
        assert!(!prompt.contains(BASE_PROMPT));
    }

    #[test]
    fn user_preferences_included() {
        let mut user = UserConfig::default();
        user.prompt.about_user = Some("Rust developer".to_string());
        user.prompt.response_preference = Some("short answers".to_string());
        let prompt = assemble_system_prompt(None, Some(&user), &ToolRegistry::new());
        assert!(prompt.contains("About the user: Rust developer"));
        assert!(prompt.contains("Response preference: short answers"));
    }
}
