use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use swarm_autonomy::TokenTracker;
use swarm_core::{ModelRole, TokenUsageRecord, TraceStore};
use swarm_llm::ChatResponse;

/// Turns each model response into a usage row: aggregated in the tracker
/// and persisted through the trace store.
pub struct UsageRecorder {
    tracker: TokenTracker,
    store: Arc<dyn TraceStore>,
}

impl UsageRecorder {
    pub fn new(tracker: TokenTracker, store: Arc<dyn TraceStore>) -> Self {
        Self { tracker, store }
    }

    pub async fn record(&self, session_id: &str, role: ModelRole, resp: &ChatResponse) {
        let record = TokenUsageRecord {
            model: resp.model.clone(),
            role,
            prompt_tokens: resp.usage.prompt_tokens,
            completion_tokens: resp.usage.completion_tokens,
            total_tokens: resp.usage.total_tokens,
            estimated_cost: resp.usage.estimated_cost_usd,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
        };
        self.tracker.record(&record);
        if let Err(e) = self.store.record_usage(&record).await {
            warn!(session = %session_id, error = %e, "failed to persist token usage");
        }
    }
}
