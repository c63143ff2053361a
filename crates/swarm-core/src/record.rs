//! Audit records produced by a run: traces, tool call records, token usage
//! and the per-iteration log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ModelRole, SessionId, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Audit record of one `run()` invocation, goal to outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<TraceId>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub initial_goal: String,
    #[serde(default)]
    pub outcome: Option<String>,
    pub status: TraceStatus,
}

impl Trace {
    pub fn open(
        session_id: impl Into<SessionId>,
        goal: impl Into<String>,
        parent_trace_id: Option<TraceId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            parent_trace_id,
            start_time: Utc::now(),
            end_time: None,
            initial_goal: goal.into(),
            outcome: None,
            status: TraceStatus::Running,
        }
    }

    /// Close the trace. A closed trace is never reopened.
    pub fn close(&mut self, status: TraceStatus, outcome: impl Into<String>) {
        if self.end_time.is_some() {
            return;
        }
        self.status = status;
        self.outcome = Some(outcome.into());
        self.end_time = Some(Utc::now());
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// One executed tool call, accumulated per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Usage of a single model call. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub model: String,
    pub role: ModelRole,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Thought,
    ToolCall,
    ToolResult,
    Status,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Thought => "thought",
            LogKind::ToolCall => "tool_call",
            LogKind::ToolResult => "tool_result",
            LogKind::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub agent_id: String,
    pub kind: LogKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
