#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use swarm_config::{ModelConfig, RoutingConfig};
    use swarm_core::{Message, ModelRole, SwarmError};
    use swarm_llm::mock::{MockProvider, MockResponse};
    use swarm_llm::provider::{LlmProvider, StopReason, StreamChunk};
    use swarm_llm::router::{BackendMode, ChatOptions, ModelRouter};

    fn routing(chain: &[(&str, &str)]) -> RoutingConfig {
        let mut routing = RoutingConfig {
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        routing.roles.thinking = chain
            .iter()
            .map(|(p, m)| ModelConfig::new(*p, *m))
            .collect();
        routing
    }

    fn router(routing: RoutingConfig, providers: &[&MockProvider]) -> ModelRouter {
        let map: HashMap<String, Arc<dyn LlmProvider>> = providers
            .iter()
            .map(|p| (p.name().to_string(), Arc::new((*p).clone()) as Arc<dyn LlmProvider>))
            .collect();
        ModelRouter::with_providers(routing, map)
    }

    fn hello() -> Vec<Message> {
        vec![Message::user("Hello")]
    }

    // ── Basic routing ──────────────────────────────────────────

    #[tokio::test]
    async fn test_chat_uses_primary() {
        let a = MockProvider::new("a").with_response("Hello from a");
        let b = MockProvider::new("b").with_response("Hello from b");
        let router = router(routing(&[("a", "m1"), ("b", "m2")]), &[&a, &b]);

        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.content, "Hello from a");
        assert_eq!(resp.model, "a/m1");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_mode_sends_bare_model_name() {
        let a = MockProvider::new("a").with_response("ok");
        let router = router(routing(&[("a", "gpt-4o")]), &[&a]);
        router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(router.initialize().await, BackendMode::Direct);
        assert_eq!(a.recorded_requests()[0].model, "gpt-4o");
        assert_eq!(a.recorded_requests()[0].messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_proxy_mode_sends_qualified_model_name() {
        let proxy = MockProvider::new("proxy").with_response("via proxy");
        let router = ModelRouter::with_proxy(
            routing(&[("openai", "gpt-4o")]),
            Arc::new(proxy.clone()),
        );
        assert_eq!(router.initialize().await, BackendMode::Proxy);
        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.content, "via proxy");
        assert_eq!(proxy.recorded_requests()[0].model, "openai/gpt-4o");
    }

    #[tokio::test]
    async fn test_cost_is_estimated_from_table() {
        let a = MockProvider::new("openai").with_response("ok");
        let router = router(routing(&[("openai", "gpt-4o")]), &[&a]);
        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        // Mock usage: 100 prompt, 50 completion.
        let expected = (100.0 * 2.50 + 50.0 * 10.00) / 1_000_000.0;
        assert!((resp.usage.estimated_cost_usd - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_options_reach_the_request() {
        let a = MockProvider::new("a").with_response("ok");
        let router = router(routing(&[("a", "m")]), &[&a]);
        let opts = ChatOptions {
            tools: vec![serde_json::json!({"type": "function"})],
            temperature: Some(0.1),
            max_tokens: Some(64),
            agent_id: None,
        };
        router.chat(ModelRole::Thinking, &hello(), &opts).await.unwrap();
        let req = &a.recorded_requests()[0];
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.max_tokens, 64);
    }

    // ── Retry and fallback ─────────────────────────────────────

    #[tokio::test]
    async fn test_transient_failure_retries_then_falls_back() {
        let a = MockProvider::new("a").always(MockResponse::error("HTTP 503: unavailable"));
        let b = MockProvider::new("b").with_response("Fallback reply");
        let router = router(routing(&[("a", "m1"), ("b", "m2")]), &[&a, &b]);

        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.content, "Fallback reply");
        assert_eq!(resp.model, "b/m2");
        // max_retries + 1 calls against A, then exactly one against B.
        assert_eq!(a.call_count(), 3);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_on_same_model() {
        let a = MockProvider::new("a")
            .with_error("HTTP 500: Internal Server Error")
            .with_response("success after retry");
        let b = MockProvider::new("b").with_response("unused");
        let router = router(routing(&[("a", "m1"), ("b", "m2")]), &[&a, &b]);

        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.content, "success after retry");
        assert_eq!(a.call_count(), 2);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_without_fallback_never_touches_next_entry() {
        let a = MockProvider::new("a").always(MockResponse::rate_limited());
        let b = MockProvider::new("b").with_response("should not be called");
        let mut cfg = routing(&[("a", "m1"), ("b", "m2")]);
        cfg.fallback_on_rate_limit = false;
        let router = router(cfg, &[&a, &b]);

        let err = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(a.call_count(), 3);
        assert_eq!(b.call_count(), 0);
        match err {
            SwarmError::ModelChainExhausted { role, failures } => {
                assert_eq!(role, "thinking");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].model, "a/m1");
                assert_eq!(failures[0].attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_http_429_text_counts_as_rate_limit() {
        let a = MockProvider::new("a").always(MockResponse::error("HTTP 429 Too Many Requests"));
        let b = MockProvider::new("b").with_response("nope");
        let mut cfg = routing(&[("a", "m1"), ("b", "m2")]);
        cfg.fallback_on_rate_limit = false;
        cfg.max_retries = 0;
        let router = router(cfg, &[&a, &b]);

        assert!(
            router
                .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
                .await
                .is_err()
        );
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let a = MockProvider::new("a").always(MockResponse::error("Invalid API key"));
        let b = MockProvider::new("b").with_response("backup");
        let router = router(routing(&[("a", "m1"), ("b", "m2")]), &[&a, &b]);

        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.content, "backup");
        assert_eq!(a.call_count(), 1);
    }

    #[tokio::test]
    async fn test_error_without_fallback_stops_chain() {
        let a = MockProvider::new("a").always(MockResponse::error("HTTP 500: boom"));
        let b = MockProvider::new("b").with_response("nope");
        let mut cfg = routing(&[("a", "m1"), ("b", "m2")]);
        cfg.fallback_on_error = false;
        let router = router(cfg, &[&a, &b]);

        assert!(
            router
                .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
                .await
                .is_err()
        );
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_every_model() {
        let a = MockProvider::new("a").always(MockResponse::error("HTTP 502: bad gateway"));
        let b = MockProvider::new("b").always(MockResponse::error("Invalid API key"));
        let router = router(routing(&[("a", "m1"), ("b", "m2")]), &[&a, &b]);

        let err = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("a/m1 (3 attempts)"));
        assert!(text.contains("b/m2 (1 attempt)"));
    }

    #[tokio::test]
    async fn test_missing_client_falls_through() {
        let b = MockProvider::new("b").with_response("from b");
        let router = router(routing(&[("ghost", "m1"), ("b", "m2")]), &[&b]);
        let resp = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.model, "b/m2");
    }

    #[tokio::test]
    async fn test_no_model_for_role() {
        let router = router(RoutingConfig::default(), &[]);
        let err = router
            .chat(ModelRole::Fast, &hello(), &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::NoModelForRole(_)));
    }

    // ── Routing updates ────────────────────────────────────────

    #[tokio::test]
    async fn test_update_routing_applies_to_next_call() {
        let a = MockProvider::new("a").always(MockResponse::text("from a"));
        let b = MockProvider::new("b").always(MockResponse::text("from b"));
        let router = router(routing(&[("a", "m1")]), &[&a, &b]);

        let first = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        router.update_routing(routing(&[("b", "m2")]));
        let second = router
            .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(first.message.content, "from a");
        assert_eq!(second.message.content, "from b");
    }

    #[tokio::test]
    async fn test_update_routing_mid_flight_keeps_snapshot() {
        let a = MockProvider::new("a")
            .always(MockResponse::error("HTTP 500: boom"))
            .with_delay(std::time::Duration::from_millis(20));
        let b = MockProvider::new("b").always(MockResponse::text("from b"));
        let mut cfg = routing(&[("a", "m1")]);
        cfg.max_retries = 1;
        let router = router(cfg, &[&a, &b]);

        let handle = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .chat(ModelRole::Thinking, &hello(), &ChatOptions::default())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        router.update_routing(routing(&[("b", "m2")]));

        // The in-flight call still walks the old chain and fails on A alone.
        assert!(handle.await.unwrap().is_err());
        assert_eq!(b.call_count(), 0);
    }

    // ── Stream ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_direct_stream_replays_single_call() {
        let a = MockProvider::new("a").with_response("streamed text");
        let router = router(routing(&[("a", "m")]), &[&a]);

        let mut rx = router
            .chat_stream(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        let mut chunks = vec![];
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert!(matches!(&chunks[0], StreamChunk::TextDelta(t) if t == "streamed text"));
        assert!(matches!(chunks.last().unwrap(), StreamChunk::Done(StopReason::EndTurn)));
        assert_eq!(a.call_count(), 1);
        assert!(!a.recorded_requests()[0].stream);
    }

    #[tokio::test]
    async fn test_proxy_stream_is_incremental() {
        let proxy = MockProvider::new("proxy").with_response("one two three");
        let router = ModelRouter::with_proxy(routing(&[("a", "m")]), Arc::new(proxy.clone()));

        let mut rx = router
            .chat_stream(ModelRole::Thinking, &hello(), &ChatOptions::default())
            .await
            .unwrap();
        let mut deltas = 0;
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            if let StreamChunk::TextDelta(t) = chunk {
                deltas += 1;
                text.push_str(&t);
            }
        }
        assert_eq!(text, "one two three");
        assert_eq!(deltas, 3);
        assert!(proxy.recorded_requests()[0].stream);
    }
}
