//! Typed publish/subscribe for conversation lifecycle events.
//!
//! Handlers run in priority order (higher first) and may yield messages the
//! engine appends to the log. A handler can stop propagation for its event,
//! or end the whole chat loop by returning [`HookError::SessionComplete`]
//! (used by autonomous-mode termination conditions).
//!
//! The registry is read-mostly after startup and safe to share across the
//! server's concurrent sessions.

pub mod cost_awareness;
pub mod token_awareness;

pub use cost_awareness::CostAwareness;
pub use token_awareness::TokenAwareness;

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::message::Message;

/// The closed set of lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookType {
    SessionStart,
    SessionEnd,
    MessagePreProcess,
    MessagePostProcess,
    GenerationPre,
    GenerationPost,
    ToolPreExecute,
    ToolPostExecute,
    LoopContinue,
}

/// Context passed to every handler.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub hook: HookType,
    pub conversation_id: String,
    pub logdir: PathBuf,
    pub workspace: Option<PathBuf>,
    /// Snapshot of the conversation at trigger time.
    pub messages: Vec<Message>,
    /// Event-specific payload (tool name, generated message, ...).
    pub data: Value,
}

impl HookContext {
    pub fn new(hook: HookType, conversation_id: impl Into<String>, logdir: PathBuf) -> Self {
        Self {
            hook,
            conversation_id: conversation_id.into(),
            logdir,
            workspace: None,
            messages: Vec::new(),
            data: Value::Null,
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_workspace(mut self, workspace: Option<PathBuf>) -> Self {
        self.workspace = workspace;
        self
    }
}

/// What one handler produced.
#[derive(Debug, Default)]
pub struct HookOutput {
    /// Messages for the engine to append, in order.
    pub messages: Vec<Message>,
    /// When set, later (lower-priority) handlers for this event are skipped.
    pub stop_propagation: bool,
}

impl HookOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn message(msg: Message) -> Self {
        Self {
            messages: vec![msg],
            stop_propagation: false,
        }
    }

    pub fn stop() -> Self {
        Self {
            messages: Vec::new(),
            stop_propagation: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    /// Terminates the chat loop cleanly.
    #[error("session complete: {0}")]
    SessionComplete(String),
    #[error("hook failed: {0}")]
    Failed(String),
}

pub type HookFn =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<HookOutput, HookError>> + Send + Sync>;

struct RegisteredHook {
    name: String,
    priority: i32,
    handler: HookFn,
}

/// The hook bus. One per process (or per server context).
#[derive(Default)]
pub struct HookBus {
    handlers: RwLock<HashMap<HookType, Vec<RegisteredHook>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; higher priority runs first.
    pub fn register(
        &self,
        name: impl Into<String>,
        hook: HookType,
        priority: i32,
        handler: HookFn,
    ) {
        let mut handlers = self.handlers.write().unwrap();
        let list = handlers.entry(hook).or_default();
        list.push(RegisteredHook {
            name: name.into(),
            priority,
            handler,
        });
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Runs all handlers for the context's event, collecting yielded messages.
    pub async fn trigger(&self, ctx: HookContext) -> Result<Vec<Message>, HookError> {
        let handlers: Vec<(String, HookFn)> = {
            let map = self.handlers.read().unwrap();
            map.get(&ctx.hook)
                .map(|list| {
                    list.iter()
                        .map(|h| (h.name.clone(), h.handler.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut collected = Vec::new();
        for (name, handler) in handlers {
            match handler(ctx.clone()).await {
                Ok(output) => {
                    collected.extend(output.messages);
                    if output.stop_propagation {
                        tracing::debug!("hook {} stopped propagation for {:?}", name, ctx.hook);
                        break;
                    }
                }
                Err(HookError::SessionComplete(reason)) => {
                    return Err(HookError::SessionComplete(reason));
                }
                Err(HookError::Failed(msg)) => {
                    // One broken hook must not take down the step.
                    tracing::warn!("hook {} failed on {:?}: {}", name, ctx.hook, msg);
                }
            }
        }
        Ok(collected)
    }
}

/// Wraps a plain async closure into a [`HookFn`].
pub fn hook_fn<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<HookOutput, HookError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(hook: HookType) -> HookContext {
        HookContext::new(hook, "conv-1", PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let bus = HookBus::new();
        bus.register(
            "low",
            HookType::SessionStart,
            1,
            hook_fn(|_| async { Ok(HookOutput::message(Message::system("low"))) }),
        );
        bus.register(
            "high",
            HookType::SessionStart,
            10,
            hook_fn(|_| async { Ok(HookOutput::message(Message::system("high"))) }),
        );
        let messages = bus.trigger(ctx(HookType::SessionStart)).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "high");
        assert_eq!(messages[1].content, "low");
    }

    #[tokio::test]
    async fn stop_propagation_halts_later_handlers() {
        let bus = HookBus::new();
        bus.register(
            "stopper",
            HookType::MessagePreProcess,
            10,
            hook_fn(|_| async { Ok(HookOutput::stop()) }),
        );
        bus.register(
            "never",
            HookType::MessagePreProcess,
            1,
            hook_fn(|_| async { Ok(HookOutput::message(Message::system("skipped"))) }),
        );
        let messages = bus.trigger(ctx(HookType::MessagePreProcess)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn session_complete_propagates() {
        let bus = HookBus::new();
        bus.register(
            "terminator",
            HookType::LoopContinue,
            0,
            hook_fn(|_| async { Err(HookError::SessionComplete("goal reached".to_string())) }),
        );
        let err = bus.trigger(ctx(HookType::LoopContinue)).await.unwrap_err();
        assert!(matches!(err, HookError::SessionComplete(_)));
    }

    #[tokio::test]
    async fn failed_hook_is_swallowed() {
        let bus = HookBus::new();
        bus.register(
            "broken",
            HookType::ToolPreExecute,
            10,
            hook_fn(|_| async { Err(HookError::Failed("boom".to_string())) }),
        );
        bus.register(
            "fine",
            HookType::ToolPreExecute,
            1,
            hook_fn(|_| async { Ok(HookOutput::message(Message::system("still here"))) }),
        );
        let messages = bus.trigger(ctx(HookType::ToolPreExecute)).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_event_yields_nothing() {
        let bus = HookBus::new();
        let messages = bus.trigger(ctx(HookType::SessionEnd)).await.unwrap();
        assert!(messages.is_empty());
    }
}
