//! Built-in shell tool: runs a command in the workspace and reports output.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{ExecContext, ToolError, ToolExecutor, ToolParam, ToolSpec, ToolUse};
use crate::message::Message;

const OUTPUT_LIMIT: usize = 16 * 1024;

pub struct ShellTool;

impl ShellTool {
    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            "shell",
            "Run a shell command in the workspace and return its output",
            Arc::new(ShellTool),
        )
        .with_block_types(vec!["shell".into(), "bash".into(), "sh".into()])
        .with_parameters(vec![ToolParam::new(
            "command",
            "string",
            "The command to run",
            true,
        )])
        .with_instructions(
            "Use the shell tool to run commands. Emit a code block tagged `shell` \
             containing the command; its stdout and stderr come back as a system message.",
        )
    }

    fn command_of(inv: &ToolUse) -> Result<String, ToolError> {
        if !inv.content.trim().is_empty() {
            // markdown/xml: the block body is the command; native JSON content
            // is handled through kwargs below
            if inv.kwargs.is_none() {
                return Ok(inv.content.trim().to_string());
            }
        }
        inv.kwargs
            .as_ref()
            .and_then(|k| k.get("command"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArgs("shell: no command given".to_string()))
    }
}

fn truncate(output: &str) -> String {
    if output.len() <= OUTPUT_LIMIT {
        return output.to_string();
    }
    let mut end = OUTPUT_LIMIT;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (output truncated)", &output[..end])
}

#[async_trait]
impl ToolExecutor for ShellTool {
    async fn execute(
        &self,
        inv: &ToolUse,
        ctx: &ExecContext,
        out: &mpsc::Sender<Message>,
    ) -> Result<(), ToolError> {
        let command = Self::command_of(inv)?;
        if ctx.interrupt.is_set() {
            return Err(ToolError::Interrupted);
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr));

        let mut text = format!("Ran command: `{command}`");
        if !stdout.trim().is_empty() {
            text.push_str(&format!("\n\n```stdout\n{}\n```", stdout.trim_end()));
        }
        if !stderr.trim().is_empty() {
            text.push_str(&format!("\n\n```stderr\n{}\n```", stderr.trim_end()));
        }
        if !output.status.success() {
            text.push_str(&format!(
                "\n\nExit code: {}",
                output.status.code().unwrap_or(-1)
            ));
        }

        out.send(Message::system(text))
            .await
            .map_err(|_| ToolError::Interrupted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::exec::run_tool;
    use std::path::PathBuf;

    fn ctx(dir: &std::path::Path) -> ExecContext {
        ExecContext::new(dir.to_path_buf(), PathBuf::from("."))
    }

    #[tokio::test]
    async fn runs_command_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "x").unwrap();
        let inv = ToolUse::new("shell", vec![], "ls");
        let messages = run_tool(&ShellTool::spec(), &inv, &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("hello.txt"));
        assert!(messages[0].content.contains("Ran command: `ls`"));
    }

    #[tokio::test]
    async fn nonzero_exit_reported() {
        let dir = tempfile::tempdir().unwrap();
        let inv = ToolUse::new("shell", vec![], "exit 3");
        let messages = run_tool(&ShellTool::spec(), &inv, &ctx(dir.path()))
            .await
            .unwrap();
        assert!(messages[0].content.contains("Exit code: 3"));
    }

    #[tokio::test]
    async fn native_invocation_reads_command_kwarg() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = ToolUse::new("shell", vec![], r#"{"command": "echo from-kwargs"}"#);
        inv.kwargs = Some(serde_json::json!({"command": "echo from-kwargs"}));
        let messages = run_tool(&ShellTool::spec(), &inv, &ctx(dir.path()))
            .await
            .unwrap();
        assert!(messages[0].content.contains("from-kwargs"));
    }

    #[tokio::test]
    async fn empty_command_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let inv = ToolUse::new("shell", vec![], "   ");
        let err = run_tool(&ShellTool::spec(), &inv, &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
