//! In-conversation slash commands.
//!
//! Unknown commands fall back to a tool-use parse (`/shell ls` style) before
//! reporting an error, so `/<langtag> <code>` invokes the matching tool
//! directly.

use weft::{generate_name, prepare_messages, ChatRequest, Message, PrepareOptions, ToolUse};

use crate::chat::{print_message, prompt_line, ChatCli};
use crate::CliError;

pub enum CommandOutcome {
    Continue,
    Exit,
    RunStep,
}

const HELP: &str = "\
/log              show the conversation
/undo [N]         drop the last N messages (default 1)
/edit             open the log in $EDITOR
/rename [name]    rename conversation ('auto' regenerates)
/fork <name>      fork into a new conversation
/tools            list available tools
/model [P/M]      show or set the model
/replay           re-print the conversation
/impersonate [..] append an assistant message and run its tools
/summarize        summarize the conversation
/tokens           rough token count of the log
/context          show the exact messages sent to the model
/export [path]    export as markdown
/commit           commit workspace changes with git
/help             this list
/exit             quit
/<tool> <code>    run a tool directly (e.g. /shell ls)";

pub async fn dispatch(cli: &mut ChatCli, line: &str) -> Result<CommandOutcome, CliError> {
    let without_slash = &line[1..];
    let (command, rest) = match without_slash.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim().to_string()),
        None => (without_slash, String::new()),
    };

    match command {
        "log" | "replay" => {
            for message in cli.log.messages() {
                print_message(message, cli.args.show_hidden);
            }
        }
        "undo" => {
            let n: usize = rest.parse().unwrap_or(1);
            let keep = cli.log.messages().len().saturating_sub(n);
            cli.log.truncate_to(keep)?;
            println!("dropped {n} message(s)");
        }
        "edit" => {
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            let path = cli.log.path();
            let status = std::process::Command::new(editor).arg(&path).status();
            match status {
                Ok(s) if s.success() => {
                    cli.log = weft::ConversationLog::open(
                        cli.logdir.clone(),
                        weft::LogOptions::default(),
                    )?;
                    println!("log reloaded");
                }
                _ => println!("editor exited without saving"),
            }
        }
        "rename" => {
            let mut chat_config = config::ChatConfig::load(&cli.logdir)?;
            let name = if rest.is_empty() || rest == "auto" {
                let meta = weft::get_model(&cli.cfg.model);
                generate_name(cli.ctx.client.as_ref(), &meta, cli.log.messages()).await?
            } else {
                rest
            };
            println!("renamed to: {name}");
            chat_config.name = Some(name);
            chat_config.save(&cli.logdir)?;
        }
        "fork" => {
            if rest.is_empty() {
                println!("usage: /fork <name>");
            } else {
                let target = weft::logs_home().join(&rest);
                cli.log.fork(&target)?;
                println!("forked to {}", target.display());
            }
        }
        "tools" => {
            for spec in cli.ctx.tools.list() {
                println!("{:<12} {}", spec.name, spec.description);
            }
        }
        "model" => {
            if rest.is_empty() {
                println!("{}", cli.cfg.model);
            } else {
                cli.cfg.model = rest.clone();
                let mut chat_config = config::ChatConfig::load(&cli.logdir)?;
                chat_config.model = Some(rest);
                chat_config.save(&cli.logdir)?;
                println!("model set to {}", cli.cfg.model);
            }
        }
        "impersonate" => {
            let content = if rest.is_empty() {
                prompt_line("assistant> ").await.unwrap_or_default()
            } else {
                rest
            };
            cli.log.append(Message::assistant(content))?;
            return Ok(CommandOutcome::RunStep);
        }
        "summarize" => {
            let meta = weft::get_model(&cli.cfg.model);
            let mut messages = vec![Message::system(
                "Summarize this conversation in a short paragraph.",
            )];
            messages.extend(cli.log.messages().iter().cloned());
            let req = ChatRequest {
                messages,
                model: meta,
                tools: vec![],
                output_schema: None,
            };
            let (summary, _) = cli.ctx.client.chat(&req).await?;
            println!("{summary}");
        }
        "tokens" => {
            let chars: usize = cli.log.messages().iter().map(|m| m.content.len()).sum();
            println!(
                "~{} tokens across {} messages",
                chars / 4,
                cli.log.messages().len()
            );
        }
        "context" => {
            let prepared = prepare_messages(
                cli.log.messages(),
                Some(cli.cfg.workspace.as_path()),
                None,
                &PrepareOptions::default(),
            )
            .await;
            for message in &prepared {
                print_message(message, true);
            }
        }
        "export" => {
            let path = if rest.is_empty() {
                cli.logdir.join("conversation.md")
            } else {
                rest.into()
            };
            let mut out = String::new();
            for m in cli.log.messages() {
                if m.hide {
                    continue;
                }
                out.push_str(&format!("## {}\n\n{}\n\n", m.role, m.content));
            }
            std::fs::write(&path, out).map_err(|e| CliError::Usage(e.to_string()))?;
            println!("exported to {}", path.display());
        }
        "commit" => {
            return run_direct_tool(
                cli,
                "shell",
                "git add -A && git commit".to_string(),
            )
            .await;
        }
        "help" => println!("{HELP}"),
        "exit" | "quit" => return Ok(CommandOutcome::Exit),
        _ => {
            // Maybe it is a direct tool invocation, `/shell ls` style.
            if cli.ctx.tools.resolve_block_tag(command).is_some() {
                return run_direct_tool(cli, command, rest).await;
            }
            println!("Unknown command: /{command} (try /help)");
        }
    }
    Ok(CommandOutcome::Continue)
}

/// Runs `/tag code` as if the assistant had emitted a fenced block of that
/// language, then hands control back to the engine.
async fn run_direct_tool(
    cli: &mut ChatCli,
    tag: &str,
    code: String,
) -> Result<CommandOutcome, CliError> {
    let Some(spec) = cli.ctx.tools.resolve_block_tag(tag) else {
        println!("Unknown tool: {tag}");
        return Ok(CommandOutcome::Continue);
    };
    let tooluse = ToolUse::new(spec.name.clone(), vec![], code);
    let exec_ctx = weft::ExecContext::new(cli.cfg.workspace.clone(), cli.logdir.clone())
        .with_interrupt(cli.ctx.interrupt.clone());
    let messages = weft::tools::exec::run_tool(&spec, &tooluse, &exec_ctx).await?;
    for message in messages {
        print_message(&message, true);
        cli.log.append(message)?;
    }
    Ok(CommandOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_every_command() {
        for cmd in [
            "/log",
            "/undo",
            "/edit",
            "/rename",
            "/fork",
            "/tools",
            "/model",
            "/replay",
            "/impersonate",
            "/summarize",
            "/tokens",
            "/context",
            "/export",
            "/commit",
            "/help",
            "/exit",
        ] {
            assert!(HELP.contains(cmd), "{cmd} missing from help");
        }
    }
}
