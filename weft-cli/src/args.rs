//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Weft: a personal agent in your terminal.
///
/// Multiple positional prompts are chained; a literal `-` separates rounds
/// (each round waits for the previous one, tools included, to finish).
/// Piped stdin is wrapped as a fenced `stdin` block on the first prompt.
#[derive(Parser, Debug, Clone)]
#[command(name = "weft", version, about)]
pub struct Args {
    /// Prompts to send; `-` separates rounds.
    pub prompts: Vec<String>,

    /// Model as `provider/model`, or a bare provider name.
    #[arg(long, short = 'm', env = "WEFT_MODEL")]
    pub model: Option<String>,

    /// Working directory for tools; `@log` means the conversation directory.
    #[arg(long, env = "WEFT_WORKSPACE")]
    pub workspace: Option<String>,

    /// Conversation name (default: generated).
    #[arg(long, default_value = "random")]
    pub name: String,

    /// Resume the most recent conversation.
    #[arg(long, short = 'r')]
    pub resume: bool,

    /// Skip tool confirmation prompts.
    #[arg(long = "no-confirm", short = 'y')]
    pub no_confirm: bool,

    /// Exit after the chained prompts instead of going interactive.
    /// Implies --no-confirm.
    #[arg(long = "non-interactive", short = 'n')]
    pub non_interactive: bool,

    /// System prompt: `full`, `short`, or custom text.
    #[arg(long, default_value = "full")]
    pub system: String,

    /// Comma-separated tool allowlist.
    #[arg(long, short = 't', value_delimiter = ',')]
    pub tools: Option<Vec<String>>,

    /// Tool-use syntax the conversation runs with.
    #[arg(long = "tool-format", value_parser = ["markdown", "xml", "tool"])]
    pub tool_format: Option<String>,

    /// Disable token streaming (single blocking completion per step).
    #[arg(long = "no-stream")]
    pub no_stream: bool,

    /// Show messages flagged as hidden.
    #[arg(long = "show-hidden")]
    pub show_hidden: bool,

    /// Verbose logging.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Args {
    /// Splits positional prompts into rounds at the literal `-`.
    pub fn prompt_rounds(&self) -> Vec<String> {
        let mut rounds = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for prompt in &self.prompts {
            if prompt == "-" {
                if !current.is_empty() {
                    rounds.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(prompt);
            }
        }
        if !current.is_empty() {
            rounds.push(current.join(" "));
        }
        rounds
    }

    pub fn workspace_path(&self, logdir: &std::path::Path) -> PathBuf {
        match self.workspace.as_deref() {
            Some("@log") => {
                let link = logdir.join("workspace");
                if link.exists() {
                    link
                } else {
                    logdir.to_path_buf()
                }
            }
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
