//! Tool execution contract.
//!
//! An executor receives the parsed invocation, a context (workspace, confirm
//! callback, interrupt flag) and a channel to emit result messages through:
//! a lazy sequence, so multi-part results stream out as they are produced.
//! Cancellation is cooperative: executors poll `ctx.interrupt` between
//! substeps.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{ToolError, ToolSpec, ToolUse};
use crate::interrupt::Interrupt;
use crate::message::Message;

/// Async confirmation callback: shown a description, answers yes/no.
pub type ConfirmFn = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

/// A callback that always confirms (server path: confirmation happened over HTTP).
pub fn always_confirm() -> ConfirmFn {
    Arc::new(|_desc| Box::pin(async { true }))
}

/// Everything an executor may need besides the invocation itself.
#[derive(Clone)]
pub struct ExecContext {
    pub workspace: PathBuf,
    pub logdir: PathBuf,
    pub confirm: ConfirmFn,
    pub interrupt: Interrupt,
}

impl ExecContext {
    pub fn new(workspace: PathBuf, logdir: PathBuf) -> Self {
        Self {
            workspace,
            logdir,
            confirm: always_confirm(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }
}

/// Implemented by every tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Runs the invocation, sending result messages through `out` as they are
    /// produced. The first is typically a system message summarizing the
    /// action; later ones may carry produced files.
    async fn execute(
        &self,
        inv: &ToolUse,
        ctx: &ExecContext,
        out: &mpsc::Sender<Message>,
    ) -> Result<(), ToolError>;
}

/// Runs a tool to completion and collects its result messages, attaching the
/// invocation's `call_id` to each. Convenience wrapper for the CLI and tests;
/// the server appends messages incrementally instead.
pub async fn run_tool(
    spec: &ToolSpec,
    inv: &ToolUse,
    ctx: &ExecContext,
) -> Result<Vec<Message>, ToolError> {
    let (tx, mut rx) = mpsc::channel::<Message>(64);
    let exec = spec.executor.execute(inv, ctx, &tx);
    tokio::pin!(exec);

    let mut messages = Vec::new();
    let result = loop {
        tokio::select! {
            maybe = rx.recv() => {
                if let Some(m) = maybe {
                    messages.push(m);
                }
            }
            res = &mut exec => break res,
        }
    };
    while let Ok(m) = rx.try_recv() {
        messages.push(m);
    }
    result?;

    if let Some(call_id) = &inv.call_id {
        for m in messages.iter_mut() {
            if m.call_id.is_none() {
                m.call_id = Some(call_id.clone());
            }
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    struct MultiPart;

    #[async_trait]
    impl ToolExecutor for MultiPart {
        async fn execute(
            &self,
            _inv: &ToolUse,
            ctx: &ExecContext,
            out: &mpsc::Sender<Message>,
        ) -> Result<(), ToolError> {
            out.send(Message::system("part one"))
                .await
                .map_err(|_| ToolError::Interrupted)?;
            if ctx.interrupt.is_set() {
                return Err(ToolError::Interrupted);
            }
            out.send(Message::system("part two"))
                .await
                .map_err(|_| ToolError::Interrupted)?;
            Ok(())
        }
    }

    fn ctx() -> ExecContext {
        ExecContext::new(PathBuf::from("."), PathBuf::from("."))
    }

    #[tokio::test]
    async fn run_tool_collects_all_parts_with_call_id() {
        let spec = ToolSpec::new("multi", "multi-part", Arc::new(MultiPart));
        let mut inv = ToolUse::new("multi", vec![], "");
        inv.call_id = Some("call_7".to_string());
        let messages = run_tool(&spec, &inv, &ctx()).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role == Role::System));
        assert!(messages
            .iter()
            .all(|m| m.call_id.as_deref() == Some("call_7")));
    }

    #[tokio::test]
    async fn interrupted_executor_stops_after_first_part() {
        let spec = ToolSpec::new("multi", "multi-part", Arc::new(MultiPart));
        let inv = ToolUse::new("multi", vec![], "");
        let interrupt = Interrupt::new();
        interrupt.set();
        let ctx = ctx().with_interrupt(interrupt);
        let err = run_tool(&spec, &inv, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Interrupted));
    }

    struct NeedsConfirm;

    #[async_trait]
    impl ToolExecutor for NeedsConfirm {
        async fn execute(
            &self,
            _inv: &ToolUse,
            ctx: &ExecContext,
            out: &mpsc::Sender<Message>,
        ) -> Result<(), ToolError> {
            if !(ctx.confirm)("dangerous substep".to_string()).await {
                out.send(Message::system("substep declined"))
                    .await
                    .map_err(|_| ToolError::Interrupted)?;
                return Ok(());
            }
            out.send(Message::system("substep ran"))
                .await
                .map_err(|_| ToolError::Interrupted)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn confirm_callback_reaches_executor() {
        let spec = ToolSpec::new("careful", "asks first", Arc::new(NeedsConfirm));
        let inv = ToolUse::new("careful", vec![], "");
        let deny: ConfirmFn = Arc::new(|_| Box::pin(async { false }));
        let messages = run_tool(&spec, &inv, &ctx().with_confirm(deny)).await.unwrap();
        assert_eq!(messages[0].content, "substep declined");
    }
}
