//! Cost-awareness hook: warns when the session cost crosses a threshold.
//!
//! The warning is staged as a *pending warning* and injected into the next
//! user turn as a hidden system message, not the current one. That keeps the
//! current turn uncluttered and guarantees the next model call actually sees
//! the budget context.

use std::sync::{Arc, Mutex};

use super::{hook_fn, HookBus, HookOutput, HookType};
use crate::costs::{crossed_thresholds, SessionCosts};
use crate::message::Message;

pub struct CostAwareness {
    costs: Arc<SessionCosts>,
    last_total: Mutex<f64>,
    pending_warning: Mutex<Option<String>>,
}

impl CostAwareness {
    pub fn new(costs: Arc<SessionCosts>) -> Arc<Self> {
        Arc::new(Self {
            costs,
            last_total: Mutex::new(0.0),
            pending_warning: Mutex::new(None),
        })
    }

    /// Registers both halves: stash after each request, inject on the next turn.
    pub fn register(self: &Arc<Self>, bus: &HookBus) {
        let stasher = self.clone();
        bus.register(
            "cost_awareness/stash",
            HookType::MessagePostProcess,
            50,
            hook_fn(move |_ctx| {
                let this = stasher.clone();
                async move {
                    this.check_thresholds();
                    Ok(HookOutput::none())
                }
            }),
        );

        let injector = self.clone();
        bus.register(
            "cost_awareness/inject",
            HookType::MessagePreProcess,
            50,
            hook_fn(move |_ctx| {
                let this = injector.clone();
                async move {
                    match this.take_pending() {
                        Some(warning) => {
                            Ok(HookOutput::message(Message::system(warning).hidden()))
                        }
                        None => Ok(HookOutput::none()),
                    }
                }
            }),
        );
    }

    fn check_thresholds(&self) {
        let total = self.costs.summary().total_cost;
        let mut last = self.last_total.lock().unwrap();
        let crossed = crossed_thresholds(*last, total);
        *last = total;
        drop(last);

        if let Some(threshold) = crossed.last() {
            let warning = format!(
                "Session cost crossed ${threshold:.2}: total is now ${total:.2}. \
                 Consider wrapping up or summarizing if the task allows."
            );
            *self.pending_warning.lock().unwrap() = Some(warning);
        }
    }

    fn take_pending(&self) -> Option<String> {
        self.pending_warning.lock().unwrap().take()
    }
}
