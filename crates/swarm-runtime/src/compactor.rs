use std::sync::Arc;
use tracing::{debug, warn};

use swarm_core::{Message, ModelRole, Result, Role, SwarmError};
use swarm_llm::{ChatOptions, ModelRouter};

use crate::accounting::UsageRecorder;

const SUMMARY_INSTRUCTIONS: &str = "You compress agent conversation history. \
Write a dense summary of the material below that another agent can continue from. \
Preserve exactly: file paths, identifiers, commands, error messages and codes, \
decisions made and their reasons, and open action items. \
Drop pleasantries and repeated content. Output only the summary.";

/// Shrinks history and oversized messages with fast-role model calls.
#[derive(Clone)]
pub struct Compactor {
    router: ModelRouter,
    agent_id: Option<String>,
    usage: Option<(Arc<UsageRecorder>, String)>,
}

impl Compactor {
    pub fn new(router: ModelRouter) -> Self {
        Self {
            router,
            agent_id: None,
            usage: None,
        }
    }

    /// Route summarization calls through this agent's overrides.
    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Record summarization usage against `session_id`.
    pub fn with_usage(mut self, recorder: Arc<UsageRecorder>, session_id: impl Into<String>) -> Self {
        self.usage = Some((recorder, session_id.into()));
        self
    }

    /// Index at which history can be split without separating an assistant
    /// tool call from its results. `[0, cut)` may be summarized; everything
    /// from `cut` on is kept. Zero means there is nothing safe to cut.
    pub fn find_safe_cut_point(messages: &[Message], keep_trailing: usize) -> usize {
        let mut cut = messages.len().saturating_sub(keep_trailing);
        while cut > 0 {
            let lands_on_tool = messages.get(cut).is_some_and(|m| m.role == Role::Tool);
            let follows_tool_call = messages[cut - 1].has_tool_calls();
            if !lands_on_tool && !follows_tool_call {
                break;
            }
            cut -= 1;
        }
        cut
    }

    /// Plain-text rendering of messages for the summarizer.
    pub fn render_transcript(messages: &[Message]) -> String {
        let mut out = String::new();
        for msg in messages {
            out.push_str(msg.role.as_str());
            out.push_str(": ");
            out.push_str(&msg.content);
            for tc in &msg.tool_calls {
                out.push_str(&format!("\n  -> {}({})", tc.name, tc.arguments));
            }
            out.push('\n');
        }
        out
    }

    /// One fast-role call. Returns the summary text.
    pub async fn summarize(&self, text: &str) -> Result<String> {
        let messages = vec![Message::system(SUMMARY_INSTRUCTIONS), Message::user(text)];
        let opts = ChatOptions {
            temperature: Some(0.2),
            agent_id: self.agent_id.clone(),
            ..Default::default()
        };
        let resp = self.router.chat(ModelRole::Fast, &messages, &opts).await?;
        if let Some((recorder, session_id)) = &self.usage {
            recorder.record(session_id, ModelRole::Fast, &resp).await;
        }
        let summary = resp.message.content.trim().to_string();
        if summary.is_empty() {
            return Err(SwarmError::Agent("summarizer returned empty text".into()));
        }
        debug!(
            input_tokens = Self::estimate_tokens(text),
            summary_tokens = Self::estimate_tokens(&summary),
            "summarized"
        );
        Ok(summary)
    }

    /// Keep `content` if it fits in half of `limit` tokens, otherwise
    /// summarize it. If summarization fails the head and tail are kept.
    pub async fn guard_large_message(&self, content: &str, limit: usize) -> String {
        let budget = limit / 2;
        if Self::estimate_tokens(content) <= budget {
            return content.to_string();
        }
        match self.summarize(content).await {
            Ok(summary) => format!("[Summarized: original was too large]\n{summary}"),
            Err(e) => {
                warn!(error = %e, "summarizing oversized message failed, truncating");
                truncate_middle(content, budget)
            }
        }
    }

    /// Word-count token estimate: `ceil(words * 1.35) + 5`.
    pub fn estimate_tokens(text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * 1.35).ceil() as usize + 5
    }
}

/// Keep the first 60% and last 20% of a `max_tokens` budget (at ~4 chars per
/// token) and replace the middle with a marker.
pub fn truncate_middle(content: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let head_chars = max_chars * 6 / 10;
    let tail_chars = max_chars * 2 / 10;
    let head: String = content.chars().take(head_chars).collect();
    let tail: String = content.chars().skip(total - tail_chars).collect();
    let omitted = total - head_chars - tail_chars;
    format!("{head}\n\n[... truncated {omitted} chars ...]\n\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(Compactor::estimate_tokens(""), 5);
        assert_eq!(Compactor::estimate_tokens("one two three four"), 11);
        assert_eq!(Compactor::estimate_tokens("a b c d e f g h i j"), 19);
    }

    #[test]
    fn test_truncate_middle_keeps_both_ends() {
        let content = format!("{}{}", "a".repeat(1000), "z".repeat(1000));
        let out = truncate_middle(&content, 100);
        assert!(out.starts_with("aaaa"));
        assert!(out.ends_with("zzzz"));
        assert!(out.contains("truncated"));
        assert!(out.len() < content.len());
    }

    #[test]
    fn test_truncate_middle_short_passthrough() {
        assert_eq!(truncate_middle("short", 100), "short");
    }

    #[test]
    fn test_transcript_includes_tool_calls() {
        let call = swarm_core::ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "src/main.rs"}),
        };
        let text = Compactor::render_transcript(&[
            Message::user("look"),
            Message::assistant_with_tools("", vec![call]),
        ]);
        assert!(text.contains("user: look"));
        assert!(text.contains("read_file"));
        assert!(text.contains("src/main.rs"));
    }
}
