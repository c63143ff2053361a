use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use swarm_core::{
    LogKind, Message, ModelRole, Result, StreamType, ToolCallRecord, ToolContext, Trace,
};
use swarm_llm::{ChatOptions, StopReason};

use crate::agent::{AgentRuntime, Completion, RunOptions};
use crate::compactor::{Compactor, truncate_middle};
use crate::context::ContextManager;
use crate::session::Session;
use crate::tool_dispatch::{error_payload, execute_batch};

const CONTINUE_PROMPT: &str = "[SYSTEM: Your previous response was cut off by the output token limit. \
Continue exactly where you left off. Do not repeat what you already said.]";

const VERIFY_PROMPT: &str = "[SYSTEM: A change you attempted reported an error, but you described the task as done. \
Check the actual state with your tools, fix what failed, and only then give your final answer.]";

const LAZY_PROMPT: &str = "[SYSTEM: You stopped but the task is NOT complete. Do not describe what could be done; \
do it with your tools and finish the job now.]";

/// How long a cancelled run waits for its in-flight tool batch.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

static CLARIFYING_QUESTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(could|can|would) you (please )?(provide|share|tell me|clarify|specify|confirm|point me|paste|send)\b|\b(which|what|where) (is the |are the )?(file|files|path|directory|folder|project|repo|repository|module|function)\b|\bplease (provide|specify|clarify|share|confirm)\b|\blet me know (which|what|where)\b",
    )
    .ok()
});

static COMPLETION_CLAIM: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(done|complete[d]?|finished|created|written|wrote|updated|saved|successful(ly)?|all set)\b").ok()
});

/// What the loop produced, before the trace is closed.
pub(crate) struct LoopOutcome {
    pub response: String,
    pub completion: Completion,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl LoopOutcome {
    fn cancelled(response: String, iterations: u32, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            response,
            completion: Completion::Cancelled,
            iterations,
            tool_calls,
        }
    }
}

/// Text that asks the user something the agent could find out itself.
pub fn is_avoidable_question(text: &str, unused_exploration_tools: &[String]) -> bool {
    if unused_exploration_tools.is_empty() || text.is_empty() {
        return false;
    }
    let asks = CLARIFYING_QUESTION
        .as_ref()
        .is_some_and(|re| re.is_match(text));
    asks || (text.len() < 600 && text.trim_end().ends_with('?'))
}

/// A short reply announcing that the work is finished. The loop only holds
/// such a reply back when a mutating tool failed in the latest batch; clean
/// mutations are trusted.
pub fn claims_completion(text: &str) -> bool {
    text.len() < 300
        && COMPLETION_CLAIM
            .as_ref()
            .is_some_and(|re| re.is_match(text))
}

/// The model is pushing remaining work onto the user instead of doing it.
/// Only strong deferral language counts, and the bar rises once the run has
/// done real work.
pub fn is_lazy_stop(text: &str, iteration: u32) -> bool {
    // Short replies are confirmations
    if text.len() < 100 {
        return false;
    }
    let lower = text.to_lowercase();

    let completion_signals = [
        "all done",
        "task complete",
        "project is complete",
        "everything is set up",
        "i've created all",
        "i have created all",
        "fully functional",
    ];
    if completion_signals.iter().any(|p| lower.contains(p)) {
        return false;
    }

    let deferral_phrases = [
        "you can customize",
        "you can further",
        "you can modify",
        "you can extend",
        "you can add more",
        "feel free to",
        "i'll leave",
        "left as an exercise",
        "you'll need to",
        "you would need to",
        "the remaining",
        "repeat this for",
        "do the same for",
        "follow the same pattern",
    ];
    let deferrals = deferral_phrases
        .iter()
        .filter(|p| lower.contains(*p))
        .count();
    let threshold = if iteration >= 8 { 3 } else { 2 };
    deferrals >= threshold
}

fn with_memory(prompt: &str, context: &[String]) -> String {
    if context.is_empty() {
        return prompt.to_string();
    }
    let mut out = prompt.to_string();
    out.push_str("\n\n<memory>\n");
    for item in context {
        out.push_str("- ");
        out.push_str(item.trim());
        out.push('\n');
    }
    out.push_str("</memory>");
    out
}

impl AgentRuntime {
    /// The turn loop. Holds the session for its whole duration.
    pub(crate) async fn drive(
        &self,
        session: &mut Session,
        goal: &str,
        opts: &RunOptions,
        trace: &Trace,
        token: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let inner = &self.inner;
        let services = &inner.services;
        let config = &services.config;
        let session_id = session.id.clone();
        let agent_id = opts
            .agent_id
            .clone()
            .unwrap_or_else(|| inner.agent_id.clone());

        session
            .context
            .set_system_prompt(with_memory(&self.system_prompt(), &opts.context));
        session.context.set_soft_token_limit(config.soft_token_limit);
        session.context.push(Message::user(goal));
        self.log(
            LogKind::Status,
            &format!("goal: {goal}"),
            serde_json::json!({ "session_id": session_id, "trace_id": trace.id }),
        )
        .await;

        let tool_ctx = ToolContext {
            agent_id: agent_id.clone(),
            session_id: session_id.clone(),
            workspace_id: config.workspace_id.clone(),
            trace_id: trace.id,
            tier: inner.tier,
        };
        let chat_opts = ChatOptions {
            tools: inner.tools.provider_schemas(),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            agent_id: Some(agent_id.clone()),
        };
        let compactor = Compactor::new(services.router.clone())
            .for_agent(agent_id.clone())
            .with_usage(services.usage.clone(), session_id.clone());
        let exploration_tools: Vec<String> = inner
            .tools
            .get_all()
            .into_iter()
            .filter(|d| d.is_exploratory())
            .map(|d| d.name)
            .collect();

        let mut used_tools: HashSet<String> = HashSet::new();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut nudges = 0u32;
        let mut unverified_mutation = false;
        let mut last_text = String::new();
        let mut carried = String::new();
        let mut iterations = 0u32;

        while iterations < config.max_iterations {
            if token.is_cancelled() {
                return Ok(LoopOutcome::cancelled(last_text, iterations, records));
            }
            self.maybe_compact(&mut session.context, &compactor, token, trace)
                .await;
            if token.is_cancelled() {
                return Ok(LoopOutcome::cancelled(last_text, iterations, records));
            }

            iterations += 1;
            session.iterations += 1;
            let meta = serde_json::json!({
                "session_id": session_id,
                "trace_id": trace.id,
                "iteration": iterations,
            });
            self.emit(
                &session_id,
                trace.id,
                StreamType::Status,
                "calling_model",
                Some(("iteration", serde_json::json!(iterations))),
            );

            let messages = session.context.full_conversation();
            let resp = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Ok(LoopOutcome::cancelled(last_text, iterations, records));
                }
                r = services.router.chat(ModelRole::Thinking, &messages, &chat_opts) => r?,
            };
            services
                .usage
                .record(&session_id, ModelRole::Thinking, &resp)
                .await;

            let stop_reason = resp.stop_reason;
            let message = resp.message;
            // `raw` keeps edge whitespace so continued output joins cleanly.
            let raw = message.content.clone();
            let text = raw.trim().to_string();
            let calls = message.tool_calls.clone();
            if !text.is_empty() {
                last_text = text.clone();
                let lane = if calls.is_empty() {
                    StreamType::Response
                } else {
                    StreamType::Thinking
                };
                self.emit(&session_id, trace.id, lane, &text, None);
                self.log(LogKind::Thought, &text, meta.clone()).await;
            }
            session.context.push(message);

            if !calls.is_empty() {
                for tc in &calls {
                    let args = tc.arguments.to_string();
                    self.emit(
                        &session_id,
                        trace.id,
                        StreamType::ToolCall,
                        &args,
                        Some(("tool", serde_json::json!(tc.name))),
                    );
                    self.log(
                        LogKind::ToolCall,
                        &format!("{}({args})", tc.name),
                        meta.clone(),
                    )
                    .await;
                }

                let batch = execute_batch(&inner.tools, &services.approval, &tool_ctx, &calls);
                tokio::pin!(batch);
                let outcomes = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        // Sub-agents run inside the batch. Stop them and give
                        // them a moment to close their own traces.
                        for child in services.registry.children_of(&session_id) {
                            services.registry.abort_hierarchy(&child);
                        }
                        match tokio::time::timeout(CANCEL_GRACE, &mut batch).await {
                            Ok(outcomes) => {
                                for outcome in outcomes {
                                    session
                                        .context
                                        .push(Message::tool_result(&outcome.call_id, outcome.content));
                                    records.push(outcome.record);
                                }
                            }
                            Err(_) => {
                                // Every call still gets a result so history stays well formed.
                                for tc in &calls {
                                    session
                                        .context
                                        .push(Message::tool_result(&tc.id, error_payload("cancelled")));
                                }
                            }
                        }
                        return Ok(LoopOutcome::cancelled(last_text, iterations, records));
                    }
                    o = &mut batch => o,
                };

                unverified_mutation = false;
                for outcome in outcomes {
                    let content = if outcome.is_error {
                        outcome.content.clone()
                    } else {
                        let limit = config.tool_result_guard_limit;
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => truncate_middle(&outcome.content, limit / 2),
                            c = compactor.guard_large_message(&outcome.content, limit) => c,
                        }
                    };
                    self.emit(
                        &session_id,
                        trace.id,
                        StreamType::ToolResult,
                        &content,
                        Some(("is_error", serde_json::json!(outcome.is_error))),
                    );
                    self.log(LogKind::ToolResult, &content, meta.clone()).await;
                    session
                        .context
                        .push(Message::tool_result(&outcome.call_id, content));

                    if outcome.mutating && outcome.is_error {
                        unverified_mutation = true;
                    }
                    used_tools.insert(outcome.name);
                    records.push(outcome.record);
                }
                continue;
            }

            if nudges < config.max_nudges {
                let unused: Vec<String> = exploration_tools
                    .iter()
                    .filter(|t| !used_tools.contains(*t))
                    .cloned()
                    .collect();
                let nudge = if stop_reason == StopReason::MaxTokens {
                    carried.push_str(&raw);
                    Some(("continue", Message::user(CONTINUE_PROMPT)))
                } else if unverified_mutation && claims_completion(&text) {
                    unverified_mutation = false;
                    Some(("verify", Message::system(VERIFY_PROMPT)))
                } else if is_avoidable_question(&text, &unused) {
                    Some((
                        "clarification",
                        Message::system(format!(
                            "[SYSTEM: Do not ask the user. Find the answer yourself first. \
                             Tools you have not tried yet: {}.]",
                            unused.join(", ")
                        )),
                    ))
                } else if is_lazy_stop(&text, iterations) {
                    Some(("lazy_stop", Message::system(LAZY_PROMPT)))
                } else {
                    None
                };

                if let Some((kind, msg)) = nudge {
                    nudges += 1;
                    info!(session = %session_id, iteration = iterations, kind, "nudging model to continue");
                    self.emit(
                        &session_id,
                        trace.id,
                        StreamType::Status,
                        "continuing",
                        Some(("nudge", serde_json::json!(kind))),
                    );
                    self.log(LogKind::Status, &format!("nudge: {kind}"), meta).await;
                    session.context.push(msg);
                    continue;
                }
            }

            let response = if text.is_empty() { last_text } else { raw };
            return Ok(LoopOutcome {
                response: format!("{carried}{response}").trim().to_string(),
                completion: Completion::Final,
                iterations,
                tool_calls: records,
            });
        }

        warn!(session = %session_id, iterations, "max iterations reached");
        Ok(LoopOutcome {
            response: format!("{carried}{last_text}").trim().to_string(),
            completion: Completion::IterationLimit,
            iterations,
            tool_calls: records,
        })
    }

    /// Summarize the oldest part of history once the context is over its
    /// soft limit. A failed summary leaves history untouched.
    async fn maybe_compact(
        &self,
        ctx: &mut ContextManager,
        compactor: &Compactor,
        token: &CancellationToken,
        trace: &Trace,
    ) {
        if !ctx.needs_compaction(None) {
            return;
        }
        let keep = self.inner.services.config.keep_trailing_messages;
        let cut = Compactor::find_safe_cut_point(ctx.messages(), keep);
        if cut == 0 {
            debug!(session = %trace.session_id, "over token limit but no safe cut point");
            return;
        }
        let transcript = Compactor::render_transcript(&ctx.messages()[..cut]);
        let summary = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            r = compactor.summarize(&transcript) => r,
        };
        match summary {
            Ok(summary) => {
                let before = ctx.estimate_token_count();
                ctx.apply_compaction(&summary, cut);
                info!(
                    session = %trace.session_id,
                    replaced = cut,
                    tokens_before = before,
                    tokens_after = ctx.estimate_token_count(),
                    "context compacted"
                );
                self.emit(
                    &trace.session_id,
                    trace.id,
                    StreamType::Status,
                    "compacted",
                    Some(("replaced_messages", serde_json::json!(cut))),
                );
            }
            Err(e) => {
                warn!(session = %trace.session_id, error = %e, "compaction failed, will retry next iteration");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avoidable_question_needs_unused_tools() {
        let q = "Which file should I edit?";
        assert!(is_avoidable_question(q, &["list_dir".into()]));
        assert!(!is_avoidable_question(q, &[]));
    }

    #[test]
    fn test_plain_answer_is_not_a_question() {
        assert!(!is_avoidable_question("Done.", &["list_dir".into()]));
        assert!(!is_avoidable_question(
            "The config lives in src/config.rs.",
            &["read_file".into()]
        ));
    }

    #[test]
    fn test_clarification_phrasing_without_question_mark() {
        assert!(is_avoidable_question(
            "Please provide the path to the project.",
            &["list_dir".into()]
        ));
    }

    #[test]
    fn test_claims_completion() {
        assert!(claims_completion("Done."));
        assert!(claims_completion("I created the file."));
        assert!(!claims_completion("Looking into it"));
        assert!(!claims_completion(&"done ".repeat(100)));
    }

    #[test]
    fn test_lazy_stop() {
        let lazy = "I've set up the basic structure for the project here. You'll need to add the \
                    remaining pages yourself, and feel free to customize the styling as needed.";
        assert!(is_lazy_stop(lazy, 1));
        assert!(!is_lazy_stop("Done.", 1));
        let finished = format!("{lazy} All done.");
        assert!(!is_lazy_stop(&finished, 1));
    }

    #[test]
    fn test_with_memory() {
        assert_eq!(with_memory("base", &[]), "base");
        let out = with_memory("base", &["user prefers tabs".into()]);
        assert!(out.contains("<memory>\n- user prefers tabs\n</memory>"));
    }
}
