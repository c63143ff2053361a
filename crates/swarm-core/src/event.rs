use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::SessionId;

/// Which lane of the live stream a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Thinking,
    Response,
    ToolCall,
    ToolResult,
    Status,
}

/// One incremental update produced while an agent runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub session_id: SessionId,
    pub trace_id: Uuid,
    pub delta: String,
    pub stream_type: StreamType,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl StreamEvent {
    pub fn new(
        session_id: impl Into<SessionId>,
        trace_id: Uuid,
        stream_type: StreamType,
        delta: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            trace_id,
            delta: delta.into(),
            stream_type,
            metadata: Default::default(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Where a runtime writes its stream events. Transports subscribe on the
/// other side; the runtime never knows who is listening.
pub trait StreamSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StreamSink for NullSink {
    fn emit(&self, _event: StreamEvent) {}
}

/// A broadcast-based fan-out sink. Subscribe before `run()`, drop the
/// receiver in cleanup to unsubscribe.
#[derive(Clone)]
pub struct StreamHub {
    sender: Arc<broadcast::Sender<StreamEvent>>,
}

impl StreamHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl StreamSink for StreamHub {
    fn emit(&self, event: StreamEvent) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(4096)
    }
}
