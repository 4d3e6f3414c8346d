//! Prepares a conversation for model input.
//!
//! Before a log goes to a provider: attached text files are materialized into
//! the message content (images stay separate for the vision path), oversized
//! tool outputs can be summarized through a cheap model, and trimming to the
//! context window always preserves `pinned` messages and the system prompt.

use async_trait::async_trait;
use std::path::Path;

use crate::llm::ProviderError;
use crate::message::{FileRef, Message, Role};

/// Rough token estimate: one token per ~4 characters.
fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
/// Attached files larger than this are referenced, not inlined.
const MAX_INLINE_FILE_BYTES: u64 = 64 * 1024;

fn is_image(file: &FileRef) -> bool {
    let name = file.as_str().to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(&format!(".{ext}")))
}

/// Summarizes long tool outputs through a cheap model.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;
}

#[derive(Clone, Debug)]
pub struct PrepareOptions {
    /// Model context window in tokens; trimming targets this.
    pub context_window: u64,
    /// When the running total exceeds this, long tool outputs are summarized.
    pub summarize_threshold: Option<u64>,
    /// Tool outputs longer than this are candidates for summarization.
    pub long_output_tokens: u64,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            summarize_threshold: None,
            long_output_tokens: 2_000,
        }
    }
}

/// Produces the message list actually sent to the provider.
pub async fn prepare_messages(
    messages: &[Message],
    workspace: Option<&Path>,
    summarizer: Option<&dyn Summarizer>,
    opts: &PrepareOptions,
) -> Vec<Message> {
    let mut prepared: Vec<Message> = messages
        .iter()
        .map(|m| materialize_files(m, workspace))
        .collect();

    if let (Some(threshold), Some(summarizer)) = (opts.summarize_threshold, summarizer) {
        let total: u64 = prepared.iter().map(|m| estimate_tokens(&m.content)).sum();
        if total > threshold {
            for msg in prepared.iter_mut() {
                let is_tool_output =
                    msg.call_id.is_some() && matches!(msg.role, Role::System | Role::Tool);
                if is_tool_output && estimate_tokens(&msg.content) > opts.long_output_tokens {
                    match summarizer.summarize(&msg.content).await {
                        Ok(short) => {
                            *msg = msg.replace_content(format!(
                                "(tool output summarized)\n{short}"
                            ));
                        }
                        Err(e) => tracing::warn!("tool output summarization failed: {}", e),
                    }
                }
            }
        }
    }

    trim_messages(prepared, opts.context_window)
}

/// Inlines attached text files into the content; images stay as attachments.
fn materialize_files(msg: &Message, workspace: Option<&Path>) -> Message {
    if msg.files.is_empty() {
        return msg.clone();
    }
    let mut content = msg.content.clone();
    let mut kept_files = Vec::new();
    for file in &msg.files {
        if is_image(file) || file.is_uri() {
            kept_files.push(file.clone());
            continue;
        }
        let FileRef::Path(path) = file else {
            continue;
        };
        let resolved = if path.is_absolute() {
            path.clone()
        } else {
            workspace.map(|w| w.join(path)).unwrap_or_else(|| path.clone())
        };
        let too_big = resolved
            .metadata()
            .map(|m| m.len() > MAX_INLINE_FILE_BYTES)
            .unwrap_or(false);
        if too_big {
            content.push_str(&format!(
                "\n\n`{}` (too large to inline)",
                path.display()
            ));
            continue;
        }
        match std::fs::read_to_string(&resolved) {
            Ok(text) => {
                content.push_str(&format!("\n\n```{}\n{}\n```", path.display(), text.trim_end()));
            }
            Err(e) => {
                content.push_str(&format!("\n\n`{}` (could not read: {e})", path.display()));
            }
        }
    }
    let mut out = msg.replace_content(content);
    out.files = kept_files;
    out
}

/// Drops oldest non-pinned, non-system messages until the estimate fits.
/// The leading system prompt and every pinned message always survive.
pub fn trim_messages(messages: Vec<Message>, context_window: u64) -> Vec<Message> {
    let budget = context_window.saturating_mul(3) / 4; // leave room for output
    let total: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if total <= budget {
        return messages;
    }

    let mut excess = total - budget;
    let mut keep: Vec<bool> = vec![true; messages.len()];
    for (i, msg) in messages.iter().enumerate() {
        if excess == 0 {
            break;
        }
        if msg.pinned || (i == 0 && msg.role == Role::System) {
            continue;
        }
        keep[i] = false;
        excess = excess.saturating_sub(estimate_tokens(&msg.content));
    }

    messages
        .into_iter()
        .zip(keep)
        .filter_map(|(m, k)| k.then_some(m))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn text_files_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "remember the milk").unwrap();
        let msg = Message::user("see attached")
            .with_files(vec![FileRef::parse("notes.txt")]);
        let out = prepare_messages(
            &[msg],
            Some(dir.path()),
            None,
            &PrepareOptions::default(),
        )
        .await;
        assert!(out[0].content.contains("remember the milk"));
        assert!(out[0].content.contains("```notes.txt"));
        assert!(out[0].files.is_empty());
    }

    #[tokio::test]
    async fn images_stay_separate() {
        let msg = Message::user("look")
            .with_files(vec![FileRef::parse("https://example.com/cat.png")]);
        let out = prepare_messages(&[msg], None, None, &PrepareOptions::default()).await;
        assert_eq!(out[0].files.len(), 1);
        assert_eq!(out[0].content, "look");
    }

    #[test]
    fn trimming_preserves_pinned_and_system() {
        let mut messages = vec![Message::system("prompt")];
        for i in 0..20 {
            messages.push(Message::user("x".repeat(400)).replace_content(format!(
                "{i}: {}",
                "x".repeat(400)
            )));
        }
        messages.push(Message::user("important").pinned());
        let trimmed = trim_messages(messages, 1_000);
        assert_eq!(trimmed[0].content, "prompt");
        assert!(trimmed.iter().any(|m| m.content == "important"));
        assert!(trimmed.len() < 22);
    }

    #[test]
    fn small_logs_are_untouched() {
        let messages = vec![Message::system("s"), Message::user("u")];
        let out = trim_messages(messages.clone(), 128_000);
        assert_eq!(out, messages);
    }

    struct FakeSummarizer;

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, _text: &str) -> Result<String, ProviderError> {
            Ok("short version".to_string())
        }
    }

    #[tokio::test]
    async fn long_tool_outputs_summarized_over_threshold() {
        let long_output = Message::system("y".repeat(40_000)).with_call_id("c1");
        let opts = PrepareOptions {
            summarize_threshold: Some(1_000),
            ..PrepareOptions::default()
        };
        let out = prepare_messages(&[long_output], None, Some(&FakeSummarizer), &opts).await;
        assert!(out[0].content.contains("short version"));
        assert!(out[0].content.contains("(tool output summarized)"));
    }

    #[tokio::test]
    async fn summarizer_not_called_under_threshold() {
        let small = Message::system("tiny output").with_call_id("c1");
        let opts = PrepareOptions {
            summarize_threshold: Some(1_000_000),
            ..PrepareOptions::default()
        };
        let out = prepare_messages(&[small.clone()], None, Some(&FakeSummarizer), &opts).await;
        assert_eq!(out[0].content, small.content);
    }
}
