#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use swarm_core::*;
    use uuid::Uuid;

    // ── Message tests ──────────────────────────────────────────

    #[test]
    fn test_message_text_constructor() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn test_tool_result_message_carries_call_id() {
        let msg = Message::tool_result("call_1", "{\"ok\":true}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        // "user" (4) + "abcde" (5) = 9 bytes -> 3 tokens
        let msg = Message::user("abcde");
        assert_eq!(msg.estimate_tokens(), 3);
    }

    #[test]
    fn test_estimate_tokens_counts_tool_calls() {
        let plain = Message::assistant("");
        let with_call = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "file_write".into(),
                arguments: json!({"path": "/tmp/x", "content": "hello world"}),
            }],
        );
        assert!(with_call.estimate_tokens() > plain.estimate_tokens());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let restored: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(restored, Role::Tool);
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_rate_limited() {
        let err = SwarmError::RateLimited { retry_after_secs: 30 };
        assert!(err.to_string().contains("30"));
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_http_429_is_rate_limit() {
        let err = SwarmError::LlmProvider("HTTP 429 Too Many Requests: slow down".into());
        assert!(err.is_rate_limit());
        let err = SwarmError::LlmProvider("HTTP 500: boom".into());
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_chain_exhausted_lists_every_model() {
        let err = SwarmError::ModelChainExhausted {
            role: "thinking".into(),
            failures: vec![
                ModelFailure {
                    model: "a/one".into(),
                    attempts: 3,
                    error: "HTTP 500".into(),
                },
                ModelFailure {
                    model: "b/two".into(),
                    attempts: 1,
                    error: "invalid key".into(),
                },
            ],
        };
        let s = err.to_string();
        assert!(s.contains("a/one (3 attempts): HTTP 500"));
        assert!(s.contains("b/two (1 attempt): invalid key"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SwarmError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    // ── Types ──────────────────────────────────────────────────

    #[test]
    fn test_tier_parse() {
        assert_eq!("Manager".parse::<Tier>().unwrap(), Tier::Manager);
        assert_eq!(" worker ".parse::<Tier>().unwrap(), Tier::Worker);
        assert!("intern".parse::<Tier>().is_err());
    }

    #[test]
    fn test_model_role_parse_and_display() {
        for role in ModelRole::ALL {
            assert_eq!(role.to_string().parse::<ModelRole>().unwrap(), role);
        }
    }

    // ── Tool registry ──────────────────────────────────────────

    struct Echo {
        name: &'static str,
        effect: ToolEffect,
    }

    #[async_trait]
    impl AgentTool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                self.name,
                "echo the text argument",
                json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            )
            .with_effect(self.effect)
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::text(args["text"].as_str().unwrap_or_default()))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: "agent".into(),
            session_id: "s1".into(),
            workspace_id: "ws".into(),
            trace_id: Uuid::new_v4(),
            tier: Tier::Worker,
        }
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let registry = ToolRegistry::new().with(Arc::new(Echo {
            name: "echo",
            effect: ToolEffect::Explore,
        }));
        let out = registry
            .execute("echo", json!({"text": "hi"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.content, "hi");
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn test_registry_rejects_missing_required_field() {
        let registry = ToolRegistry::new().with(Arc::new(Echo {
            name: "echo",
            effect: ToolEffect::Explore,
        }));
        let err = registry.execute("echo", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArguments { .. }));
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn test_registry_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, SwarmError::ToolNotFound(_)));
    }

    #[test]
    fn test_registry_register_replaces_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo {
            name: "echo",
            effect: ToolEffect::Explore,
        }));
        registry.register(Arc::new(Echo {
            name: "echo",
            effect: ToolEffect::Mutate,
        }));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_all()[0].is_mutating());
    }

    #[test]
    fn test_registry_without_and_schemas() {
        let registry = ToolRegistry::new()
            .with(Arc::new(Echo {
                name: "a",
                effect: ToolEffect::Explore,
            }))
            .with(Arc::new(Echo {
                name: "b",
                effect: ToolEffect::Mutate,
            }));
        let trimmed = registry.without("a");
        assert_eq!(registry.len(), 2);
        assert_eq!(trimmed.len(), 1);

        let schemas = registry.provider_schemas();
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[1]["function"]["name"], "b");
    }

    // ── Stream hub ─────────────────────────────────────────────

    #[test]
    fn test_stream_hub_fan_out() {
        let hub = StreamHub::default();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        hub.emit(StreamEvent::new("s1", Uuid::nil(), StreamType::Status, "starting"));

        assert_eq!(rx1.try_recv().unwrap().delta, "starting");
        assert_eq!(rx2.try_recv().unwrap().stream_type, StreamType::Status);
    }

    #[test]
    fn test_stream_hub_unsubscribe_on_drop() {
        let hub = StreamHub::default();
        let rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(rx);
        assert_eq!(hub.subscriber_count(), 0);
        // Emitting without subscribers is fine.
        hub.emit(StreamEvent::new("s1", Uuid::nil(), StreamType::Response, "x"));
    }

    #[test]
    fn test_stream_event_metadata_serde() {
        let ev = StreamEvent::new("s1", Uuid::nil(), StreamType::ToolCall, "file_write")
            .with_meta("is_sub_agent", true);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["stream_type"], "tool_call");
        assert_eq!(json["metadata"]["is_sub_agent"], true);
    }

    // ── Trace / store ──────────────────────────────────────────

    #[test]
    fn test_trace_close_is_final() {
        let mut trace = Trace::open("s1", "goal", None);
        assert_eq!(trace.status, TraceStatus::Running);
        trace.close(TraceStatus::Completed, "done");
        trace.close(TraceStatus::Failed, "late");
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.outcome.as_deref(), Some("done"));
        assert!(!trace.is_open());
    }

    #[tokio::test]
    async fn test_memory_store_child_traces() {
        let store = MemoryStore::new();
        let parent = Trace::open("root", "goal", None);
        let child = Trace::open("child", "sub goal", Some(parent.id));
        store.save_trace(&parent).await.unwrap();
        store.save_trace(&child).await.unwrap();

        let children = store.child_traces(parent.id);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].session_id, "child");
    }

    #[tokio::test]
    async fn test_memory_store_logs() {
        let store = MemoryStore::new();
        store
            .append("agent", LogKind::Thought, "thinking", None)
            .await
            .unwrap();
        store
            .append("agent", LogKind::ToolCall, "file_write", Some(json!({"id": "c1"})))
            .await
            .unwrap();
        assert_eq!(store.logs().len(), 2);
        assert_eq!(store.logs_of_kind(LogKind::ToolCall).len(), 1);
    }
}
