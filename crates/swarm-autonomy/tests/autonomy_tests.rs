#[cfg(test)]
mod tests {
    // ── Approval Service ───────────────────────────────────────

    mod approval {
        use std::time::Duration;
        use swarm_autonomy::{ApprovalKind, ApprovalService};

        fn service() -> ApprovalService {
            ApprovalService::with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
        }

        #[test]
        fn test_take_receiver_once() {
            let svc = service();
            assert!(svc.take_receiver().is_some());
            assert!(svc.take_receiver().is_none());
        }

        #[tokio::test]
        async fn test_approved_flow() {
            let svc = service();
            let mut rx = svc.take_receiver().unwrap();

            let handle = {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.request(
                        ApprovalKind::YesNo,
                        "delete build dir",
                        serde_json::json!({"tool": "shell"}),
                    )
                    .await
                })
            };

            let req = rx.recv().await.unwrap();
            assert_eq!(req.description, "delete build dir");
            assert_eq!(req.metadata["tool"], "shell");
            assert_eq!(svc.pending().len(), 1);
            assert!(svc.resolve(req.id, true));

            assert!(handle.await.unwrap());
            assert!(svc.pending().is_empty());
        }

        #[tokio::test]
        async fn test_denied_flow() {
            let svc = service();
            let mut rx = svc.take_receiver().unwrap();
            let handle = {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.request(ApprovalKind::YesNo, "push", serde_json::Value::Null)
                        .await
                })
            };
            let req = rx.recv().await.unwrap();
            assert!(svc.resolve(req.id, false));
            assert!(!handle.await.unwrap());
        }

        #[tokio::test]
        async fn test_first_resolution_wins() {
            let svc = service();
            let mut rx = svc.take_receiver().unwrap();
            let handle = {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.request(ApprovalKind::YesNo, "deploy", serde_json::Value::Null)
                        .await
                })
            };
            let req = rx.recv().await.unwrap();
            assert!(svc.resolve(req.id, true));
            assert!(!svc.resolve(req.id, false));
            assert!(handle.await.unwrap());
        }

        #[tokio::test]
        async fn test_timeout_denies() {
            let svc =
                ApprovalService::with_timeouts(Duration::from_millis(20), Duration::from_secs(5));
            let mut rx = svc.take_receiver().unwrap();
            let approved = svc
                .request(ApprovalKind::YesNo, "slow human", serde_json::Value::Null)
                .await;
            assert!(!approved);

            // Late resolution finds nothing
            let req = rx.recv().await.unwrap();
            assert!(!svc.resolve(req.id, true));
            assert!(svc.pending().is_empty());
        }

        #[tokio::test]
        async fn test_closed_channel_denies_immediately() {
            let svc = service();
            drop(svc.take_receiver());
            let approved = svc
                .request(ApprovalKind::YesNo, "nobody listening", serde_json::Value::Null)
                .await;
            assert!(!approved);
            assert!(svc.pending().is_empty());
        }

        #[tokio::test]
        async fn test_free_text_answer() {
            let svc = service();
            let mut rx = svc.take_receiver().unwrap();
            let handle = {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.ask("Which branch?", serde_json::Value::Null).await
                })
            };
            let req = rx.recv().await.unwrap();
            assert_eq!(req.kind, ApprovalKind::FreeText);
            assert!(svc.respond(req.id, "main"));
            assert_eq!(handle.await.unwrap().as_deref(), Some("main"));
        }

        #[tokio::test]
        async fn test_yes_no_answered_with_text() {
            let svc = service();
            let mut rx = svc.take_receiver().unwrap();
            for (answer, expected) in [("no", false), ("maybe later", false), ("Yes", true)] {
                let handle = {
                    let svc = svc.clone();
                    tokio::spawn(async move {
                        svc.request(ApprovalKind::YesNo, "drop table", serde_json::Value::Null)
                            .await
                    })
                };
                let req = rx.recv().await.unwrap();
                assert!(svc.respond(req.id, answer));
                assert_eq!(handle.await.unwrap(), expected, "answer {answer:?}");
            }
        }

        #[test]
        fn test_unknown_id() {
            let svc = service();
            assert!(!svc.resolve(uuid::Uuid::new_v4(), true));
            assert!(!svc.respond(uuid::Uuid::new_v4(), "x"));
        }
    }

    // ── Token Tracker ──────────────────────────────────────────

    mod usage {
        use chrono::Utc;
        use swarm_autonomy::TokenTracker;
        use swarm_core::{ModelRole, TokenUsageRecord};

        fn rec(session: &str, model: &str, prompt: u32, completion: u32, cost: f64) -> TokenUsageRecord {
            TokenUsageRecord {
                model: model.into(),
                role: ModelRole::Fast,
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
                estimated_cost: cost,
                timestamp: Utc::now(),
                session_id: session.into(),
            }
        }

        #[test]
        fn test_totals_by_session_and_model() {
            let tracker = TokenTracker::new();
            tracker.record(&rec("s1", "openai/gpt-4o", 100, 20, 0.01));
            tracker.record(&rec("s1", "groq/llama", 50, 10, 0.0));
            tracker.record(&rec("s2", "openai/gpt-4o", 10, 5, 0.002));

            let s1 = tracker.session("s1");
            assert_eq!(s1.calls, 2);
            assert_eq!(s1.prompt_tokens, 150);
            assert_eq!(s1.total_tokens, 180);

            let gpt = tracker.model("openai/gpt-4o");
            assert_eq!(gpt.calls, 2);
            assert_eq!(gpt.completion_tokens, 25);
            assert!((gpt.cost_usd - 0.012).abs() < 1e-9);

            let global = tracker.global();
            assert_eq!(global.calls, 3);
            assert_eq!(global.total_tokens, 195);
        }

        #[test]
        fn test_unknown_session_is_zero() {
            let tracker = TokenTracker::new();
            assert_eq!(tracker.session("nope").calls, 0);
        }

        #[test]
        fn test_clones_share_state() {
            let tracker = TokenTracker::new();
            let other = tracker.clone();
            other.record(&rec("s", "m", 1, 1, 0.0));
            assert_eq!(tracker.global().calls, 1);
            let snap = tracker.snapshot();
            assert_eq!(snap.by_session.len(), 1);
            assert_eq!(snap.by_model.len(), 1);
        }
    }

    // ── Tier Policy ────────────────────────────────────────────

    mod hierarchy {
        use swarm_autonomy::{allowed_children, can_spawn, check_spawn};
        use swarm_core::Tier;

        #[test]
        fn test_allowed_children() {
            assert_eq!(allowed_children(Tier::Architect), vec![Tier::Manager]);
            assert_eq!(allowed_children(Tier::Manager), vec![Tier::Worker]);
            assert!(allowed_children(Tier::Worker).is_empty());
        }

        #[test]
        fn test_can_spawn() {
            assert!(can_spawn(Tier::Architect));
            assert!(can_spawn(Tier::Manager));
            assert!(!can_spawn(Tier::Worker));
        }

        #[test]
        fn test_architect_cannot_skip_manager() {
            let refusal = check_spawn(Tier::Architect, Tier::Worker, 0).unwrap_err();
            assert!(refusal.starts_with("Hierarchy violation"));
        }

        #[test]
        fn test_single_live_manager() {
            assert!(check_spawn(Tier::Architect, Tier::Manager, 0).is_ok());
            assert!(check_spawn(Tier::Architect, Tier::Manager, 1).is_err());
        }
    }
}
