use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::{Message, Result, ToolCall};

/// One chat-completions call against one concrete model.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model name as the backend expects it: bare for direct provider calls,
    /// "provider/model" when going through the proxy.
    pub model: String,
    /// Full conversation, system prompt first.
    pub messages: Vec<Message>,
    /// OpenAI `tools` entries.
    pub tools: Vec<Value>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// A complete (non-streaming) response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    /// `finish_reason = "length"`: output was cut off.
    MaxTokens,
    ContentFilter,
}

impl StopReason {
    pub fn from_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> Self {
        match reason {
            Some("length") => StopReason::MaxTokens,
            Some("content_filter") => StopReason::ContentFilter,
            _ if has_tool_calls => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        }
    }
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    /// Usage stats (sent at end of stream).
    Usage(Usage),
    Done(StopReason),
    /// An error occurred mid-stream.
    Error(String),
}

/// Token usage statistics as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Filled in by the router from the pricing table.
    #[serde(default)]
    pub estimated_cost_usd: f64,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost_usd: 0.0,
        }
    }

    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

/// Trait implemented by every model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name, e.g. "proxy", "openai", "groq".
    fn name(&self) -> &str;

    /// Send a non-streaming request.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Send a streaming request. Returns a receiver for chunks.
    async fn stream(&self, request: &LlmRequest)
    -> Result<tokio::sync::mpsc::Receiver<StreamChunk>>;

    /// Check if this provider is reachable.
    async fn health_check(&self) -> Result<()>;
}
