//! Token-awareness hook: announces the budget at session start and reports
//! usage after each tool execution.
//!
//! Usage is accumulated incrementally (only messages not seen before are
//! counted), so long conversations do not pay O(N²) tokenization.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{hook_fn, HookBus, HookOutput, HookType};
use crate::message::Message;

/// Rough token estimate used throughout: one token per ~4 characters.
fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

pub struct TokenAwareness {
    budget: u64,
    used: AtomicU64,
    seen_messages: AtomicUsize,
}

impl TokenAwareness {
    pub fn new(budget: u64) -> Arc<Self> {
        Arc::new(Self {
            budget,
            used: AtomicU64::new(0),
            seen_messages: AtomicUsize::new(0),
        })
    }

    pub fn register(self: &Arc<Self>, bus: &HookBus) {
        let announcer = self.clone();
        bus.register(
            "token_awareness/announce",
            HookType::SessionStart,
            40,
            hook_fn(move |_ctx| {
                let this = announcer.clone();
                async move {
                    Ok(HookOutput::message(
                        Message::system(format!(
                            "<budget:token_budget>{}</budget:token_budget>",
                            this.budget
                        ))
                        .hidden(),
                    ))
                }
            }),
        );

        let reporter = self.clone();
        bus.register(
            "token_awareness/report",
            HookType::ToolPostExecute,
            40,
            hook_fn(move |ctx| {
                let this = reporter.clone();
                async move {
                    this.absorb(&ctx.messages);
                    let used = this.used.load(Ordering::SeqCst);
                    let remaining = this.budget.saturating_sub(used);
                    Ok(HookOutput::message(
                        Message::system(format!(
                            "<system_warning>Token usage: {used}/{budget}; {remaining} remaining</system_warning>",
                            budget = this.budget,
                        ))
                        .hidden(),
                    ))
                }
            }),
        );
    }

    /// Counts only messages beyond the last seen index.
    fn absorb(&self, messages: &[Message]) {
        let seen = self.seen_messages.swap(messages.len(), Ordering::SeqCst);
        let new: u64 = messages
            .iter()
            .skip(seen)
            .map(|m| estimate_tokens(&m.content))
            .sum();
        self.used.fetch_add(new, Ordering::SeqCst);
    }
}
