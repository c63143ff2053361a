//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::provider::*;
use swarm_core::{Message, Result, SwarmError, ToolCall};

/// A mock LLM provider that returns pre-configured responses.
///
/// # Example
/// ```
/// use swarm_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("Hello, world!");
/// ```
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Returned once the queue is empty.
    fallback: Arc<Mutex<Option<MockResponse>>>,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    delay: Option<Duration>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// If set, the provider will return this error instead.
    pub error: Option<MockError>,
}

#[derive(Clone, Debug)]
pub enum MockError {
    /// Surfaced as `SwarmError::LlmProvider`.
    Provider(String),
    /// Surfaced as `SwarmError::RateLimited`.
    RateLimited(u64),
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: Usage::new(100, 50),
            error: None,
        }
    }
}

impl MockResponse {
    /// Create a text response.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// A text response cut off by the token limit.
    pub fn truncated(text: &str) -> Self {
        Self {
            text: text.to_string(),
            stop_reason: StopReason::MaxTokens,
            ..Default::default()
        }
    }

    /// A response requesting the given tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        }
    }

    /// Create an error response.
    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(MockError::Provider(msg.to_string())),
            ..Default::default()
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            error: Some(MockError::RateLimited(0)),
            ..Default::default()
        }
    }
}

/// Build a tool call with a fresh id.
pub fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments: args,
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            fallback: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(vec![])),
            delay: None,
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.with_mock_response(MockResponse::text(text))
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.with_mock_response(MockResponse::tool_calls(vec![tool_call(name, args)]))
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.with_mock_response(MockResponse::error(error))
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push(resp);
        self
    }

    /// Respond with `resp` forever once the queue runs dry.
    pub fn always(self, resp: MockResponse) -> Self {
        *self.fallback.lock() = Some(resp);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response directly (for mutable access patterns).
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push(resp);
    }

    /// All requests that were made to this provider.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Pop the next queued response, or return the fallback.
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            self.fallback.lock().clone().unwrap_or_else(|| MockResponse {
                text: "(mock: no more queued responses)".to_string(),
                ..Default::default()
            })
        } else {
            responses.remove(0)
        }
    }

    async fn answer(&self, request: &LlmRequest) -> Result<MockResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match mock.error {
            Some(MockError::Provider(error)) => Err(SwarmError::LlmProvider(error)),
            Some(MockError::RateLimited(secs)) => Err(SwarmError::RateLimited {
                retry_after_secs: secs,
            }),
            None => Ok(mock),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mock = self.answer(request).await?;
        Ok(LlmResponse {
            message: Message::assistant_with_tools(mock.text, mock.tool_calls),
            usage: mock.usage,
            stop_reason: mock.stop_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let mock = self.answer(request).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            // Stream the text word by word
            for word in mock.text.split_inclusive(' ') {
                let _ = tx.send(StreamChunk::TextDelta(word.to_string())).await;
            }
            for tc in mock.tool_calls {
                let _ = tx.send(StreamChunk::ToolCall(tc)).await;
            }
            let _ = tx.send(StreamChunk::Usage(mock.usage)).await;
            let _ = tx.send(StreamChunk::Done(mock.stop_reason)).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            messages: vec![Message::user("hello")],
            tools: vec![],
            max_tokens: 100,
            temperature: 0.7,
            stream: false,
        }
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let resp = provider.complete(&req()).await.unwrap();
        assert_eq!(resp.message.content, "Hello!");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert!(!resp.message.has_tool_calls());
    }

    #[tokio::test]
    async fn test_mock_tool_call() {
        let provider =
            MockProvider::new("mock").with_tool_call("list_dir", serde_json::json!({"path": "."}));
        let resp = provider.complete(&req()).await.unwrap();
        assert_eq!(resp.message.tool_calls[0].name, "list_dir");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
    }

    #[tokio::test]
    async fn test_mock_errors() {
        let provider = MockProvider::new("mock")
            .with_error("HTTP 500: boom")
            .with_mock_response(MockResponse::rate_limited());
        let e1 = provider.complete(&req()).await.unwrap_err();
        let e2 = provider.complete(&req()).await.unwrap_err();
        assert!(!e1.is_rate_limit());
        assert!(e2.is_rate_limit());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_fallback_repeats() {
        let provider = MockProvider::new("mock")
            .with_response("first")
            .always(MockResponse::text("again"));
        let r1 = provider.complete(&req()).await.unwrap();
        let r2 = provider.complete(&req()).await.unwrap();
        let r3 = provider.complete(&req()).await.unwrap();
        assert_eq!(r1.message.content, "first");
        assert_eq!(r2.message.content, "again");
        assert_eq!(r3.message.content, "again");
    }

    #[tokio::test]
    async fn test_mock_streaming() {
        let provider = MockProvider::new("mock").with_response("Hello world");
        let mut rx = provider.stream(&req()).await.unwrap();
        let mut text = String::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            if let StreamChunk::TextDelta(ref t) = chunk {
                text.push_str(t);
            }
            last = Some(chunk);
        }
        assert_eq!(text, "Hello world");
        assert!(matches!(last, Some(StreamChunk::Done(StopReason::EndTurn))));
    }
}
