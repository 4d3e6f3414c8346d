//! Prompt-cache breakpoint placement for the Anthropic family.
//!
//! Anthropic allows at most four `cache_control: ephemeral` breakpoints per
//! request. Placement is a pluggable strategy; the default puts one on the
//! system prompt when it is large, then on the most recent user turn
//! boundaries, leaving one slot open for callers with special needs.

use crate::message::{Message, Role};

pub const MAX_CACHE_BREAKPOINTS: usize = 4;

/// Rough token estimate: one token per ~4 characters.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Chooses which messages carry a cache breakpoint.
pub trait CacheStrategy: Send + Sync {
    /// Returns indices into `messages` that should carry `cache_control`,
    /// plus whether the top-level system prompt gets one. At most
    /// [`MAX_CACHE_BREAKPOINTS`] marks total.
    fn placements(&self, system: &str, messages: &[Message]) -> CachePlacement;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachePlacement {
    pub cache_system: bool,
    pub message_indices: Vec<usize>,
}

/// Default: (1) system prompt if > 1024 estimated tokens, (2) the most recent
/// user turn boundary, (3) the one before it, (4) one slot left open.
#[derive(Clone, Copy, Debug, Default)]
pub struct FourBreakpointStrategy;

impl CacheStrategy for FourBreakpointStrategy {
    fn placements(&self, system: &str, messages: &[Message]) -> CachePlacement {
        let cache_system = estimate_tokens(system) > 1024;
        let mut message_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.role == Role::User)
            .take(2)
            .map(|(i, _)| i)
            .collect();
        message_indices.sort_unstable();

        let budget = MAX_CACHE_BREAKPOINTS - 1; // one slot intentionally open
        let available = budget - usize::from(cache_system);
        message_indices.truncate(available);
        CachePlacement {
            cache_system,
            message_indices,
        }
    }
}

pub fn default_cache_strategy() -> Box<dyn CacheStrategy> {
    Box::new(FourBreakpointStrategy)
}
