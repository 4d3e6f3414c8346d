//! Session-level cost accounting.
//!
//! Each session owns one [`SessionCosts`]; entries are recorded per provider
//! request and summarized on demand. Sessions in the same process never share
//! an accumulator, so costs stay attributable.
//!
//! `cache_hit_rate = cache_read / (input + cache_read + cache_creation)`.
//! The denominator includes plain input because some content is intentionally
//! non-cached; this keeps the number honest.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Cost thresholds (USD) that trigger a budget warning when crossed,
/// in $10 increments after the first $10 for extended sessions.
pub const COST_WARNING_THRESHOLDS: &[f64] = &[
    0.10, 0.50, 1.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 200.0,
    500.0, 1000.0,
];

/// Single cost entry from one LLM request.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost: f64,
}

/// Aggregated view over a session's entries.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct CostSummary {
    pub session_id: String,
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_hit_rate: f64,
    pub request_count: usize,
}

/// Per-session cost accumulator. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct SessionCosts {
    session_id: String,
    entries: Mutex<Vec<CostEntry>>,
}

impl SessionCosts {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, entry: CostEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn summary(&self) -> CostSummary {
        let entries = self.entries.lock().unwrap();
        let total_cost = entries.iter().map(|e| e.cost).sum();
        let total_input_tokens = entries.iter().map(|e| e.input_tokens).sum();
        let total_output_tokens = entries.iter().map(|e| e.output_tokens).sum();
        let cache_read_tokens: u64 = entries.iter().map(|e| e.cache_read_tokens).sum();
        let cache_creation_tokens: u64 = entries.iter().map(|e| e.cache_creation_tokens).sum();

        let denominator = total_input_tokens + cache_read_tokens + cache_creation_tokens;
        let cache_hit_rate = if denominator == 0 {
            0.0
        } else {
            cache_read_tokens as f64 / denominator as f64
        };

        CostSummary {
            session_id: self.session_id.clone(),
            total_cost,
            total_input_tokens,
            total_output_tokens,
            cache_read_tokens,
            cache_creation_tokens,
            cache_hit_rate,
            request_count: entries.len(),
        }
    }
}

/// Thresholds crossed moving from `before` to `after` total cost.
pub fn crossed_thresholds(before: f64, after: f64) -> Vec<f64> {
    COST_WARNING_THRESHOLDS
        .iter()
        .copied()
        .filter(|t| before < *t && after >= *t)
        .collect()
}
