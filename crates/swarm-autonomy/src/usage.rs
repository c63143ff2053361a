use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use swarm_core::TokenUsageRecord;

/// Running sums over a set of model calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, record: &TokenUsageRecord) {
        self.calls += 1;
        self.prompt_tokens += u64::from(record.prompt_tokens);
        self.completion_tokens += u64::from(record.completion_tokens);
        self.total_tokens += u64::from(record.total_tokens);
        self.cost_usd += record.estimated_cost;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageState {
    pub global: UsageTotals,
    pub by_session: HashMap<String, UsageTotals>,
    pub by_model: HashMap<String, UsageTotals>,
}

/// Aggregates per-call token usage into session, model and global totals.
/// Cheap to clone; every clone sees the same totals.
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    state: Arc<RwLock<UsageState>>,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one call into every total.
    pub fn record(&self, record: &TokenUsageRecord) {
        let mut state = self.state.write();
        state.global.add(record);
        state
            .by_session
            .entry(record.session_id.clone())
            .or_default()
            .add(record);
        state
            .by_model
            .entry(record.model.clone())
            .or_default()
            .add(record);
        debug!(
            session = %record.session_id,
            model = %record.model,
            tokens = record.total_tokens,
            cost_usd = record.estimated_cost,
            "token usage recorded"
        );
    }

    pub fn session(&self, session_id: &str) -> UsageTotals {
        self.state
            .read()
            .by_session
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn model(&self, model: &str) -> UsageTotals {
        self.state
            .read()
            .by_model
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    pub fn global(&self) -> UsageTotals {
        self.state.read().global.clone()
    }

    /// Get the current totals.
    pub fn snapshot(&self) -> UsageState {
        self.state.read().clone()
    }
}
