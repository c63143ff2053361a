use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use swarm_core::{Message, Result, Role, SwarmError, ToolCall};
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::*;

/// OpenAI-compatible chat-completions client. Serves both the local proxy
/// and every direct provider (OpenAI, Groq, OpenRouter, Ollama, ...).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    provider_name: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider_name: name.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Per-call timeout applied to every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn transport_error(&self, e: reqwest::Error) -> SwarmError {
        if e.is_timeout() {
            SwarmError::Timeout(self.timeout.as_secs())
        } else {
            SwarmError::LlmProvider(format!("{}: {}", self.provider_name, e))
        }
    }
}

/// Wire shape of one message.
pub fn wire_message(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant if msg.has_tool_calls() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                json!(msg.content)
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        Role::Tool => match msg.tool_call_id {
            Some(ref id) => json!({ "role": "tool", "tool_call_id": id, "content": msg.content }),
            // An orphaned result would be rejected by the API; send it as user text.
            None => json!({ "role": "user", "content": msg.content }),
        },
        role => json!({ "role": role.as_str(), "content": msg.content }),
    }
}

/// Request body for `/chat/completions`.
pub fn build_body(request: &LlmRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
    let mut body = json!({
        "model": request.model,
        "temperature": request.temperature,
        "messages": messages,
    });

    // Newer OpenAI models (o1, o3, gpt-5, …) require max_completion_tokens
    if uses_max_completion_tokens(&request.model) {
        body["max_completion_tokens"] = json!(request.max_tokens);
    } else {
        body["max_tokens"] = json!(request.max_tokens);
    }

    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }
    if request.stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

/// Parse a non-streaming `/chat/completions` response body.
pub fn parse_response(data: &Value) -> Result<LlmResponse> {
    let choice = data["choices"]
        .get(0)
        .ok_or_else(|| SwarmError::LlmProvider("response has no choices".into()))?;
    let content = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(ToolCall {
                        id: c["id"].as_str()?.to_string(),
                        name: c["function"]["name"].as_str()?.to_string(),
                        arguments: parse_arguments(c["function"]["arguments"].as_str()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let stop_reason =
        StopReason::from_finish_reason(choice["finish_reason"].as_str(), !tool_calls.is_empty());

    let usage_data = &data["usage"];
    let prompt = usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32;
    let completion = usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32;
    let mut usage = Usage::new(prompt, completion);
    if let Some(total) = usage_data["total_tokens"].as_u64() {
        usage.total_tokens = total as u32;
    }

    Ok(LlmResponse {
        message: Message::assistant_with_tools(content, tool_calls),
        usage,
        stop_reason,
    })
}

fn parse_arguments(raw: Option<&str>) -> Value {
    match raw {
        Some(s) if !s.trim().is_empty() => {
            serde_json::from_str(s).unwrap_or_else(|_| json!({ "_raw": s }))
        }
        _ => json!({}),
    }
}

/// Map a non-success HTTP response to an error. 429 becomes `RateLimited`
/// when the server sends a `retry-after` hint.
async fn status_error(resp: reqwest::Response) -> SwarmError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = resp.text().await.unwrap_or_default();
    match (status.as_u16(), retry_after) {
        (429, Some(secs)) => SwarmError::RateLimited {
            retry_after_secs: secs,
        },
        _ => SwarmError::LlmProvider(format!("HTTP {status}: {text}")),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mut body = build_body(request);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("stream");
            obj.remove("stream_options");
        }
        debug!(provider = %self.provider_name, model = %request.model, "chat completion");

        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let data: Value = resp.json().await.map_err(|e| self.transport_error(e))?;
        parse_response(&data)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let mut req = request.clone();
        req.stream = true;
        let body = build_body(&req);

        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        for chunk in parser.feed(&bytes) {
                            let done = matches!(chunk, StreamChunk::Done(_));
                            if tx.send(chunk).await.is_err() || done {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            // Stream ended without [DONE]
            for chunk in parser.finish() {
                let _ = tx.send(chunk).await;
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        let mut req = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(self.timeout);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| self.transport_error(e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }
}

/// Incremental parser for the chat-completions SSE stream.
#[derive(Default)]
pub struct SseParser {
    /// Raw bytes of the unfinished line. Decoded only once the line is
    /// complete, so characters split across network chunks survive.
    buffer: Vec<u8>,
    /// Tool call deltas by index: (id, name, arguments_json).
    tool_calls: HashMap<u64, (String, String, String)>,
    usage: Usage,
    finish_reason: Option<String>,
    finished: bool,
}

impl SseParser {
    /// Feed raw bytes; returns every chunk completed by them.
    pub fn feed(&mut self, bytes: impl AsRef<[u8]>) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes.as_ref());
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                out.extend(self.finish());
                return out;
            }
            let Ok(event) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            let delta = &event["choices"][0]["delta"];
            if let Some(text) = delta["content"].as_str()
                && !text.is_empty()
            {
                out.push(StreamChunk::TextDelta(text.to_string()));
            }
            if let Some(tcs) = delta["tool_calls"].as_array() {
                for tc in tcs {
                    let idx = tc["index"].as_u64().unwrap_or(0);
                    let entry = self.tool_calls.entry(idx).or_default();
                    if let Some(id) = tc["id"].as_str() {
                        entry.0 = id.to_string();
                    }
                    if let Some(name) = tc["function"]["name"].as_str() {
                        entry.1.push_str(name);
                    }
                    if let Some(args) = tc["function"]["arguments"].as_str() {
                        entry.2.push_str(args);
                    }
                }
            }
            if let Some(fr) = event["choices"][0]["finish_reason"].as_str() {
                self.finish_reason = Some(fr.to_string());
            }
            if let Some(usage) = event.get("usage").filter(|u| u.is_object()) {
                let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
                let completion = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
                self.usage = Usage::new(prompt, completion);
            }
        }
        out
    }

    /// Flush accumulated tool calls, usage and the terminal `Done`.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.finished {
            return vec![];
        }
        self.finished = true;
        let mut indices: Vec<u64> = self.tool_calls.keys().copied().collect();
        indices.sort_unstable();
        let mut out: Vec<StreamChunk> = indices
            .into_iter()
            .filter_map(|i| self.tool_calls.remove(&i))
            .map(|(id, name, args)| {
                StreamChunk::ToolCall(ToolCall {
                    id,
                    name,
                    arguments: parse_arguments(Some(&args)),
                })
            })
            .collect();
        let has_tool_calls = !out.is_empty();
        out.push(StreamChunk::Usage(std::mem::take(&mut self.usage)));
        out.push(StreamChunk::Done(StopReason::from_finish_reason(
            self.finish_reason.as_deref(),
            has_tool_calls,
        )));
        out
    }
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
        || m.contains("gpt-5")
        || m.contains("gpt5")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<Message>) -> LlmRequest {
        LlmRequest {
            model: "gpt-4o".into(),
            messages,
            tools: vec![],
            max_tokens: 256,
            temperature: 0.2,
            stream: false,
        }
    }

    #[test]
    fn test_body_carries_tool_call_pairing() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "file_write".into(),
            arguments: json!({"path": "x"}),
        };
        let body = build_body(&request(vec![
            Message::system("sys"),
            Message::user("write x"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool_result("call_1", "{\"ok\":true}"),
        ]));
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert!(msgs[2]["content"].is_null());
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["name"], "file_write");
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"x\"}");
        assert_eq!(msgs[3]["tool_call_id"], "call_1");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_reasoning_models_use_max_completion_tokens() {
        let mut req = request(vec![]);
        req.model = "openai/o3-mini".into();
        let body = build_body(&req);
        assert_eq!(body["max_completion_tokens"], 256);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_length_finish_reason() {
        let data = json!({
            "choices": [{ "message": { "content": "partial" }, "finish_reason": "length" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let resp = parse_response(&data).unwrap();
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.message.content, "partial");
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_tool_calls() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "list_dir", "arguments": "{\"path\":\".\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_response(&data).unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.message.tool_calls[0].arguments["path"], ".");
    }

    #[test]
    fn test_parse_empty_choices_is_error() {
        assert!(parse_response(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_sse_parser_assembles_split_tool_call() {
        let mut parser = SseParser::default();
        let mut chunks = parser.feed(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"ls\",\"arguments\":\"{\\\"pa\"}}]}}]}\n",
        );
        chunks.extend(parser.feed(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"th\\\":1}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\
             data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":4}}\n\
             data: [DONE]\n",
        ));

        assert!(matches!(&chunks[0], StreamChunk::TextDelta(t) if t == "Hi"));
        let call = chunks
            .iter()
            .find_map(|c| match c {
                StreamChunk::ToolCall(tc) => Some(tc.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.name, "ls");
        assert_eq!(call.arguments["path"], 1);
        assert!(chunks.iter().any(|c| matches!(c, StreamChunk::Usage(u) if u.total_tokens == 7)));
        assert!(matches!(chunks.last().unwrap(), StreamChunk::Done(StopReason::ToolUse)));
        // Nothing more after [DONE].
        assert!(parser.feed("data: {}\n").is_empty());
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_sse_parser_keeps_split_multibyte_chars() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café…\"}}]}\n".as_bytes();
        // Split inside the three-byte ellipsis.
        let cut = line.len() - 8;
        let mut parser = SseParser::default();
        let mut chunks = parser.feed(&line[..cut]);
        assert!(chunks.is_empty());
        chunks.extend(parser.feed(&line[cut..]));
        assert!(matches!(&chunks[0], StreamChunk::TextDelta(t) if t == "café…"));
    }
}
