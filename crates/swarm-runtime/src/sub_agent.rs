use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use swarm_autonomy::{allowed_children, check_spawn};
use swarm_core::{
    AgentTool, LogKind, Result, SessionId, StreamEvent, StreamSink, SwarmError, Tier,
    ToolCallRecord, ToolContext, ToolDefinition, ToolOutput, ToolRegistry, TraceId,
};

use crate::agent::{AgentRuntime, Completion, RunOptions, Services};
use crate::registry::AbortHandle;

/// Name the spawn tool is exposed under.
pub const SPAWN_TOOL_NAME: &str = "spawn_swarm_agent";

/// Longest result text written to the activity log. Callers still get the
/// full text.
const LOGGED_RESULT_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub parent_trace_id: Option<TraceId>,
    pub parent_session_id: SessionId,
    pub goal: String,
    pub tier: Tier,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub result: String,
    pub trace_id: TraceId,
    pub tool_calls: Vec<ToolCallRecord>,
    pub child_session_id: SessionId,
    pub completion: Completion,
}

#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    Completed(SpawnResult),
    /// The tier policy said no. The text is meant for the model.
    Refused(String),
}

/// Builds, registers and runs child runtimes on behalf of one parent.
#[derive(Clone)]
pub struct SubAgentSpawner {
    services: Services,
    /// The parent's tools minus its spawn tool.
    base_tools: ToolRegistry,
    parent_tier: Tier,
    parent_agent_id: String,
    sink: Arc<dyn StreamSink>,
    created: Arc<AtomicUsize>,
}

impl SubAgentSpawner {
    pub(crate) fn new(
        services: Services,
        base_tools: ToolRegistry,
        parent_tier: Tier,
        parent_agent_id: String,
        sink: Arc<dyn StreamSink>,
    ) -> Self {
        Self {
            services,
            base_tools,
            parent_tier,
            parent_agent_id,
            sink,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn parent_tier(&self) -> Tier {
        self.parent_tier
    }

    /// Children this spawner has actually started.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn spawn(&self, req: SpawnRequest) -> Result<SpawnOutcome> {
        let registry = &self.services.registry;
        let parent_tier = self.parent_tier;
        let live = registry.count_children(&req.parent_session_id, req.tier);
        if let Err(refusal) = check_spawn(parent_tier, req.tier, live) {
            warn!(
                parent = %req.parent_session_id,
                %parent_tier,
                requested = %req.tier,
                "spawn refused"
            );
            return Ok(SpawnOutcome::Refused(refusal));
        }

        let short = Uuid::new_v4().simple().to_string();
        let short = &short[..8];
        let child_session_id = format!("{}/{}-{short}", req.parent_session_id, req.tier);
        let agent_id = req
            .agent_id
            .clone()
            .unwrap_or_else(|| format!("{}-{short}", req.tier));

        let relay = Arc::new(RelaySink {
            parent: self.sink.clone(),
            parent_session_id: req.parent_session_id.clone(),
            parent_trace_id: req.parent_trace_id,
            child_session_id: child_session_id.clone(),
        });
        let child = AgentRuntime::assemble(
            self.services.clone(),
            self.base_tools.clone(),
            req.tier,
            agent_id.clone(),
            relay,
            true,
        );

        // Re-checked under the registry lock so concurrent spawns cannot
        // both take the last slot.
        if let Err(refusal) = registry.register_child(
            &child_session_id,
            Arc::new(child.clone()) as Arc<dyn AbortHandle>,
            &req.parent_session_id,
            req.tier,
            |live| check_spawn(parent_tier, req.tier, live),
        ) {
            return Ok(SpawnOutcome::Refused(refusal));
        }
        let _registration = registry.guard(&child_session_id);
        self.created.fetch_add(1, Ordering::SeqCst);

        info!(
            parent = %req.parent_session_id,
            parent_agent = %self.parent_agent_id,
            child = %child_session_id,
            agent = %agent_id,
            tier = %req.tier,
            "sub-agent spawned"
        );

        let opts = RunOptions {
            parent_session_id: Some(req.parent_session_id.clone()),
            parent_trace_id: req.parent_trace_id,
            ..Default::default()
        };
        let run = child.run(&req.goal, &child_session_id, opts).await?;

        let logged: String = run.response.chars().take(LOGGED_RESULT_CHARS).collect();
        if let Err(e) = self
            .services
            .log_store
            .append(
                &self.parent_agent_id,
                LogKind::Status,
                &format!("sub-agent {agent_id} finished: {logged}"),
                Some(json!({
                    "child_session_id": child_session_id,
                    "trace_id": run.trace.id,
                    "tool_calls": run.tool_calls.len(),
                })),
            )
            .await
        {
            warn!(error = %e, "failed to log sub-agent result");
        }

        Ok(SpawnOutcome::Completed(SpawnResult {
            result: run.response,
            trace_id: run.trace.id,
            tool_calls: run.tool_calls,
            child_session_id,
            completion: run.completion,
        }))
    }
}

/// Forwards a child's stream events into the parent's stream.
struct RelaySink {
    parent: Arc<dyn StreamSink>,
    parent_session_id: SessionId,
    parent_trace_id: Option<TraceId>,
    child_session_id: SessionId,
}

impl StreamSink for RelaySink {
    fn emit(&self, mut event: StreamEvent) {
        event
            .metadata
            .insert("is_sub_agent".to_string(), Value::Bool(true));
        // Grandchildren keep their own id.
        event
            .metadata
            .entry("child_session_id")
            .or_insert_with(|| Value::String(self.child_session_id.clone()));
        event.session_id = self.parent_session_id.clone();
        if let Some(trace_id) = self.parent_trace_id {
            event.trace_id = trace_id;
        }
        self.parent.emit(event);
    }
}

/// `spawn_swarm_agent`: lets a model delegate a goal to a lower tier.
pub struct SpawnAgentTool {
    spawner: SubAgentSpawner,
}

impl SpawnAgentTool {
    pub fn new(spawner: SubAgentSpawner) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl AgentTool for SpawnAgentTool {
    fn definition(&self) -> ToolDefinition {
        let allowed: Vec<&str> = allowed_children(self.spawner.parent_tier)
            .iter()
            .map(|t| t.as_str())
            .collect();
        ToolDefinition::new(
            SPAWN_TOOL_NAME,
            format!(
                "Create a sub-agent and wait for it to finish a goal. You ({}) may create: {}.",
                self.spawner.parent_tier,
                allowed.join(", ")
            ),
            json!({
                "type": "object",
                "properties": {
                    "agentType": {
                        "type": "string",
                        "enum": ["architect", "manager", "worker"],
                        "description": "Tier of the agent to create"
                    },
                    "goal": {
                        "type": "string",
                        "description": "What the sub-agent must accomplish, with all context it needs"
                    },
                    "agentId": {
                        "type": "string",
                        "description": "Optional name for the sub-agent"
                    }
                },
                "required": ["agentType", "goal"]
            }),
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let invalid = |reason: &str| SwarmError::InvalidArguments {
            tool: SPAWN_TOOL_NAME.to_string(),
            reason: reason.to_string(),
        };
        let tier: Tier = args
            .get("agentType")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing 'agentType'"))?
            .parse()
            .map_err(|e: String| invalid(&e))?;
        let goal = args
            .get("goal")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| invalid("missing 'goal'"))?
            .to_string();
        let agent_id = args
            .get("agentId")
            .and_then(Value::as_str)
            .map(String::from);

        let outcome = self
            .spawner
            .spawn(SpawnRequest {
                parent_trace_id: Some(ctx.trace_id),
                parent_session_id: ctx.session_id.clone(),
                goal,
                tier,
                agent_id,
            })
            .await?;

        Ok(match outcome {
            SpawnOutcome::Refused(refusal) => ToolOutput::text(refusal),
            SpawnOutcome::Completed(res) => ToolOutput::text(
                json!({
                    "agentType": tier,
                    "childSessionId": res.child_session_id,
                    "traceId": res.trace_id,
                    "toolCalls": res.tool_calls.len(),
                    "completion": res.completion,
                    "result": res.result,
                })
                .to_string(),
            ),
        })
    }
}
