//! Interactive chat loop: rounds, confirmation prompts, Ctrl-C handling.

use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stream_event::SessionEvent;
use weft::{
    assemble_system_prompt, client_for, default_model_from_env, execute_tool, needs_resume,
    run_step_loop, skip_tool, split_model_string, ConversationLog, EventSink, LogOptions,
    Message, ProjectConfig, Role, StepConfig, StepContext, ToolFormatName, ToolRegistry,
    UserConfig,
};

use crate::args::Args;
use crate::CliError;

pub struct ChatCli {
    pub args: Args,
    pub logdir: PathBuf,
    pub log: ConversationLog,
    pub ctx: StepContext,
    pub cfg: StepConfig,
}

impl ChatCli {
    pub fn setup(args: Args) -> Result<Self, CliError> {
        let logs_home = weft::logs_home();

        let logdir = if args.resume {
            weft::list_conversations(&logs_home, 1)?
                .into_iter()
                .next()
                .map(|c| logs_home.join(c.id))
                .ok_or_else(|| CliError::Usage("no conversation to resume".to_string()))?
        } else {
            logs_home.join(conversation_name(&args.name))
        };

        let mut log = ConversationLog::open(
            &logdir,
            LogOptions {
                lock: true,
                create: true,
                ..LogOptions::default()
            },
        )?;

        let mut chat_config = config::ChatConfig::load(&logdir)?;
        if let Some(fmt) = &args.tool_format {
            chat_config.tool_format = fmt
                .parse::<ToolFormatName>()
                .map_err(CliError::Usage)?;
        }
        if args.tools.is_some() {
            chat_config.tools = args.tools.clone();
        }
        if let Some(model) = &args.model {
            chat_config.model = Some(model.clone());
        }

        let model = chat_config
            .model
            .clone()
            .or_else(default_model_from_env)
            .ok_or_else(|| {
                CliError::Usage(
                    "no model: pass --model or set a provider API key (e.g. ANTHROPIC_API_KEY)"
                        .to_string(),
                )
            })?;
        chat_config.model = Some(model.clone());

        let registry = weft::tools::global();
        let tools: Arc<ToolRegistry> = match &chat_config.tools {
            Some(allow) => Arc::new(registry.scoped(allow)),
            None => registry,
        };

        let workspace = args.workspace_path(&logdir);
        chat_config.workspace = Some(workspace.clone());
        chat_config.save(&logdir)?;

        // New conversation: lead with the system prompt.
        if log.messages().is_empty() {
            let prompt = match args.system.as_str() {
                "full" => {
                    let project = ProjectConfig::load(&workspace).ok().flatten();
                    let user = UserConfig::load("weft").ok();
                    assemble_system_prompt(project.as_ref(), user.as_ref(), &tools)
                }
                "short" => weft::BASE_PROMPT.to_string(),
                custom => custom.to_string(),
            };
            log.append(Message::system(prompt))?;
        }

        let (provider, _) = split_model_string(&model);
        let client = client_for(&provider)?;
        let conversation_id = logdir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("conversation")
            .to_string();

        let mut ctx = StepContext::new(conversation_id, client.clone(), tools);
        ctx.summary_client = Some(client);
        ctx.events = display_sink(args.show_hidden, !args.no_stream);
        weft::CostAwareness::new(ctx.costs.clone()).register(&ctx.hooks);

        let mut cfg = StepConfig::from_chat_config(&chat_config, &model);
        cfg.stream = !args.no_stream && chat_config.stream;
        cfg.auto_confirm = args.no_confirm || args.non_interactive;
        cfg.workspace = workspace;

        Ok(Self {
            args,
            logdir,
            log,
            ctx,
            cfg,
        })
    }

    pub async fn run(mut self) -> Result<(), CliError> {
        spawn_ctrl_c_handler(&self.ctx);

        let mut rounds = self.args.prompt_rounds();
        if let Some(stdin_block) = read_piped_stdin() {
            match rounds.first_mut() {
                Some(first) => {
                    first.push_str("\n\n");
                    first.push_str(&stdin_block);
                }
                None => rounds.push(stdin_block),
            }
        }

        // Crash recovery: a trailing user message means the previous run died
        // before replying; generate first, do not prompt.
        if self.args.resume && needs_resume(self.log.messages()) {
            self.engine_round().await?;
        }

        for round in rounds {
            self.log.append(Message::user(round))?;
            self.engine_round().await?;
        }

        if self.args.non_interactive {
            return Ok(());
        }

        loop {
            let Some(line) = prompt_line("> ").await else {
                break; // EOF
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('/') {
                match crate::commands::dispatch(&mut self, &line).await? {
                    crate::commands::CommandOutcome::Exit => break,
                    crate::commands::CommandOutcome::RunStep => self.engine_round().await?,
                    crate::commands::CommandOutcome::Continue => {}
                }
                continue;
            }
            self.log.append(Message::user(line))?;
            self.engine_round().await?;
        }
        Ok(())
    }

    /// One full round: steps until the model stops asking for tools,
    /// prompting for each non-auto-confirmed tool in between.
    pub async fn engine_round(&mut self) -> Result<(), CliError> {
        self.ctx.interrupt.clear();
        loop {
            run_step_loop(&mut self.log, &self.ctx, &self.cfg).await?;
            if self.ctx.interrupt.is_set() {
                return Ok(());
            }

            let pending: Vec<String> = self
                .ctx
                .pending_tools
                .iter()
                .map(|e| e.key().clone())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            for tool_id in pending {
                if !self.confirm_and_run(&tool_id).await? {
                    return Ok(()); // user bailed
                }
            }
            // tool output appended: loop back into the engine
        }
    }

    /// Interactive confirmation for one pending tool. Returns false when the
    /// user wants to stop the round.
    async fn confirm_and_run(&mut self, tool_id: &str) -> Result<bool, CliError> {
        let Some(entry) = self.ctx.pending_tools.get(tool_id).map(|e| e.value().clone())
        else {
            return Ok(true); // cleared by an interrupt meanwhile
        };
        println!(
            "\nTool: {}\n---\n{}\n---",
            entry.tooluse.tool, entry.tooluse.content
        );

        loop {
            let Some(answer) = prompt_line("Run? [Y/n/e(dit)/s(kip)/a(uto) N] ").await else {
                return Ok(false);
            };
            let answer = answer.trim().to_lowercase();
            match answer.as_str() {
                "" | "y" | "yes" => {
                    execute_tool(&mut self.log, &self.ctx, &self.cfg, tool_id).await?;
                    return Ok(true);
                }
                "n" | "no" | "s" | "skip" => {
                    skip_tool(&mut self.log, &self.ctx, tool_id)?;
                    return Ok(true);
                }
                "e" | "edit" => {
                    println!("New content (single line):");
                    let Some(content) = prompt_line("") .await else {
                        return Ok(false);
                    };
                    weft::edit_tool(&mut self.log, &self.ctx, tool_id, content)?;
                    execute_tool(&mut self.log, &self.ctx, &self.cfg, tool_id).await?;
                    return Ok(true);
                }
                other if other.starts_with('a') => {
                    let count: i64 = other
                        .trim_start_matches('a')
                        .trim_start_matches("uto")
                        .trim()
                        .parse()
                        .unwrap_or(1);
                    self.ctx
                        .auto_confirm_count
                        .store(count.max(1), Ordering::SeqCst);
                    execute_tool(&mut self.log, &self.ctx, &self.cfg, tool_id).await?;
                    return Ok(true);
                }
                _ => println!("y = run, n/s = skip, e = edit first, a N = auto-run next N"),
            }
        }
    }

}

/// Terminal display wired as an event sink.
fn display_sink(show_hidden: bool, streaming: bool) -> EventSink {
    EventSink::new(move |event| match event {
        SessionEvent::GenerationProgress { token } => {
            if streaming {
                print!("{token}");
                let _ = std::io::stdout().flush();
            }
        }
        SessionEvent::GenerationComplete { message } => {
            if streaming {
                println!();
            } else if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                println!("{content}");
            }
        }
        SessionEvent::MessageAdded { message } => {
            let hidden = message
                .get("hide")
                .and_then(|h| h.as_bool())
                .unwrap_or(false);
            if hidden && !show_hidden {
                return;
            }
            let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("?");
            let content = message
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("");
            println!("[{role}] {content}");
        }
        SessionEvent::Interrupted => println!("\n[interrupted]"),
        SessionEvent::Error { error } => eprintln!("error: {error}"),
        _ => {}
    })
}

fn conversation_name(arg: &str) -> String {
    if arg != "random" {
        return arg.to_string();
    }
    let date = chrono::Local::now().format("%Y-%m-%d");
    let suffix = uuid::Uuid::new_v4().to_string();
    format!("{date}-{}", &suffix[..8])
}

fn read_piped_stdin() -> Option<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer).ok()?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("```stdin\n{trimmed}\n```"))
}

/// Reads one line from the terminal without blocking the runtime.
pub async fn prompt_line(prompt: &str) -> Option<String> {
    if !prompt.is_empty() {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
    }
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

fn spawn_ctrl_c_handler(ctx: &StepContext) {
    let interrupt = ctx.interrupt.clone();
    let generating = ctx.generating.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            interrupt.set();
            generating.store(false, Ordering::SeqCst);
        }
    });
}

/// Prints a message the way the terminal display does (for /log and /replay).
pub fn print_message(message: &Message, show_hidden: bool) {
    if message.hide && !show_hidden {
        return;
    }
    match message.role {
        Role::Assistant => println!("assistant> {}", message.content),
        role => println!("[{role}] {}", message.content),
    }
}
