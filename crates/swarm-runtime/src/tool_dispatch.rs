use chrono::Utc;
use futures::future::join_all;
use std::time::Instant;
use tracing::{debug, info, warn};

use swarm_autonomy::{ApprovalKind, ApprovalService};
use swarm_core::{ToolCall, ToolCallRecord, ToolContext, ToolRegistry};

/// What one tool call produced, ready to be appended to history.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    /// Tool-result message content. Errors are `{"error": ...}` JSON.
    pub content: String,
    pub is_error: bool,
    /// The tool changes state (files, processes, remote systems).
    pub mutating: bool,
    pub record: ToolCallRecord,
}

/// Error payload the model receives in place of a result.
pub fn error_payload(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Calls may run concurrently when every one of them is known, read-only
/// and needs no approval.
pub fn is_parallel_safe(tools: &ToolRegistry, calls: &[ToolCall]) -> bool {
    calls.len() > 1
        && calls.iter().all(|tc| {
            tools
                .get(&tc.name)
                .map(|t| t.definition())
                .is_some_and(|def| !def.is_mutating() && !def.requires_approval)
        })
}

/// Execute one turn's tool calls. Outcomes come back in issue order
/// whether or not the calls ran concurrently.
pub async fn execute_batch(
    tools: &ToolRegistry,
    approval: &ApprovalService,
    ctx: &ToolContext,
    calls: &[ToolCall],
) -> Vec<ToolOutcome> {
    if is_parallel_safe(tools, calls) {
        debug!(session = %ctx.session_id, count = calls.len(), "running tool calls in parallel");
        return join_all(calls.iter().map(|tc| execute_one(tools, approval, ctx, tc))).await;
    }
    let mut outcomes = Vec::with_capacity(calls.len());
    for tc in calls {
        outcomes.push(execute_one(tools, approval, ctx, tc).await);
    }
    outcomes
}

async fn execute_one(
    tools: &ToolRegistry,
    approval: &ApprovalService,
    ctx: &ToolContext,
    call: &ToolCall,
) -> ToolOutcome {
    let started_at = Utc::now();
    let start = Instant::now();
    let definition = tools.get(&call.name).map(|t| t.definition());
    let mutating = definition.as_ref().is_some_and(|d| d.is_mutating());

    let (content, is_error) = match definition {
        Some(def) if def.requires_approval => {
            let approved = approval
                .request(
                    ApprovalKind::YesNo,
                    &format!("Agent '{}' wants to run '{}'", ctx.agent_id, call.name),
                    serde_json::json!({
                        "tool": call.name,
                        "arguments": call.arguments,
                        "session_id": ctx.session_id,
                        "agent_id": ctx.agent_id,
                    }),
                )
                .await;
            if approved {
                run(tools, ctx, call).await
            } else {
                info!(tool = %call.name, session = %ctx.session_id, "tool call not approved");
                (
                    error_payload(&format!(
                        "Execution of '{}' was not approved. Try a different approach that does not need it.",
                        call.name
                    )),
                    true,
                )
            }
        }
        _ => run(tools, ctx, call).await,
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let record = ToolCallRecord {
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        result: (!is_error).then(|| content.clone()),
        error: is_error.then(|| content.clone()),
        started_at,
        duration_ms,
    };
    ToolOutcome {
        call_id: call.id.clone(),
        name: call.name.clone(),
        content,
        is_error,
        mutating,
        record,
    }
}

async fn run(tools: &ToolRegistry, ctx: &ToolContext, call: &ToolCall) -> (String, bool) {
    match tools.execute(&call.name, call.arguments.clone(), ctx).await {
        Ok(output) if output.is_error => (error_payload(&output.content), true),
        Ok(output) => (output.content, false),
        Err(e) => {
            warn!(tool = %call.name, session = %ctx.session_id, error = %e, "tool call failed");
            (error_payload(&e.to_string()), true)
        }
    }
}
