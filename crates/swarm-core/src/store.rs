use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::record::{LogEntry, LogKind, TokenUsageRecord, Trace};
use crate::types::TraceId;

/// Append-only agent activity log.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(
        &self,
        agent_id: &str,
        kind: LogKind,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<()>;
}

/// Repository for traces and token usage rows.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Insert or replace a trace by id.
    async fn save_trace(&self, trace: &Trace) -> Result<()>;

    async fn get_trace(&self, id: TraceId) -> Result<Option<Trace>>;

    async fn record_usage(&self, record: &TokenUsageRecord) -> Result<()>;
}

/// In-process store backing both traits. Used by tests and by hosts that
/// don't need persistence.
#[derive(Clone, Default)]
pub struct MemoryStore {
    logs: Arc<RwLock<Vec<LogEntry>>>,
    traces: Arc<RwLock<HashMap<TraceId, Trace>>>,
    usage: Arc<RwLock<Vec<TokenUsageRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().clone()
    }

    pub fn logs_of_kind(&self, kind: LogKind) -> Vec<LogEntry> {
        self.logs
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn traces(&self) -> Vec<Trace> {
        self.traces.read().values().cloned().collect()
    }

    /// Traces whose parent is `parent`.
    pub fn child_traces(&self, parent: TraceId) -> Vec<Trace> {
        self.traces
            .read()
            .values()
            .filter(|t| t.parent_trace_id == Some(parent))
            .cloned()
            .collect()
    }

    pub fn usage(&self) -> Vec<TokenUsageRecord> {
        self.usage.read().clone()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append(
        &self,
        agent_id: &str,
        kind: LogKind,
        content: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.logs.write().push(LogEntry {
            agent_id: agent_id.to_string(),
            kind,
            content: content.to_string(),
            metadata,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn save_trace(&self, trace: &Trace) -> Result<()> {
        self.traces.write().insert(trace.id, trace.clone());
        Ok(())
    }

    async fn get_trace(&self, id: TraceId) -> Result<Option<Trace>> {
        Ok(self.traces.read().get(&id).cloned())
    }

    async fn record_usage(&self, record: &TokenUsageRecord) -> Result<()> {
        self.usage.write().push(record.clone());
        Ok(())
    }
}
