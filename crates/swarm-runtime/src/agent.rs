use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use swarm_autonomy::{ApprovalService, TokenTracker, can_spawn};
use swarm_config::AgentConfig;
use swarm_core::{
    LogKind, LogStore, MemoryStore, NullSink, Result, SessionId, StreamEvent, StreamSink,
    StreamType, Tier, ToolCallRecord, ToolRegistry, Trace, TraceId, TraceStatus, TraceStore,
};
use swarm_llm::ModelRouter;

use crate::accounting::UsageRecorder;
use crate::registry::{AbortHandle, RuntimeRegistry};
use crate::session::SessionManager;
use crate::sub_agent::{SPAWN_TOOL_NAME, SpawnAgentTool, SubAgentSpawner};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent that completes goals by using tools.

## Principles
- Act, don't just talk about acting. Use tools to inspect and change things.
- Explore before asking. If a file, path or fact can be discovered with a tool, discover it instead of asking the user.
- Diagnose and retry on errors. Read the error, fix the cause, try again.
- Finish the job. When the goal is met, reply with a short summary of what you did.";

/// Role guidance appended to the system prompt for each tier.
pub fn tier_guidance(tier: Tier, can_delegate: bool) -> String {
    let body = match tier {
        Tier::Architect => {
            "You are the ARCHITECT. Understand the goal, design the approach, and hand the \
             execution to exactly one manager. You never create workers directly."
        }
        Tier::Manager => {
            "You are a MANAGER. Split the work you were given into focused tasks and create \
             one worker per task. Integrate their results and report back."
        }
        Tier::Worker => {
            "You are a WORKER. Do the task you were given yourself with the tools you have. \
             You cannot create other agents."
        }
    };
    if can_delegate {
        format!("{body}\nDelegate with the `{SPAWN_TOOL_NAME}` tool.")
    } else {
        body.to_string()
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The model produced a final answer.
    Final,
    /// `max_iterations` was reached; the response is the best text so far.
    IterationLimit,
    /// The run was aborted.
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub parent_session_id: Option<SessionId>,
    pub parent_trace_id: Option<TraceId>,
    /// Externally retrieved memory injected into the system prompt.
    pub context: Vec<String>,
    /// Persona used for per-agent routing overrides. Defaults to the
    /// runtime's agent id.
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub response: String,
    pub trace: Trace,
    pub tool_calls: Vec<ToolCallRecord>,
    pub completion: Completion,
    /// Model calls made by this run.
    pub iterations: u32,
}

/// Everything a runtime shares with the children it spawns.
#[derive(Clone)]
pub(crate) struct Services {
    pub router: ModelRouter,
    pub log_store: Arc<dyn LogStore>,
    pub trace_store: Arc<dyn TraceStore>,
    pub tracker: TokenTracker,
    pub approval: ApprovalService,
    pub registry: RuntimeRegistry,
    pub config: AgentConfig,
    pub usage: Arc<UsageRecorder>,
}

pub(crate) struct RuntimeInner {
    pub services: Services,
    pub tools: ToolRegistry,
    pub tier: Tier,
    pub agent_id: String,
    pub sink: Arc<dyn StreamSink>,
    pub system_prompt: RwLock<String>,
    pub sessions: SessionManager,
    /// Cancellation for the run currently holding each session.
    pub active: Mutex<HashMap<SessionId, CancellationToken>>,
    pub spawner: Option<SubAgentSpawner>,
}

/// Runs goals to completion: model call, tool execution, repeat.
///
/// Cheap to clone; clones share sessions and services.
#[derive(Clone)]
pub struct AgentRuntime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl AgentRuntime {
    pub fn builder(router: ModelRouter) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(router)
    }

    pub(crate) fn assemble(
        services: Services,
        tools: ToolRegistry,
        tier: Tier,
        agent_id: String,
        sink: Arc<dyn StreamSink>,
        spawning: bool,
    ) -> Self {
        // Any spawn tool in the incoming set belongs to another runtime.
        let base = tools.without(SPAWN_TOOL_NAME);
        let (tools, spawner) = if spawning && can_spawn(tier) {
            let spawner = SubAgentSpawner::new(
                services.clone(),
                base.clone(),
                tier,
                agent_id.clone(),
                sink.clone(),
            );
            let tool = SpawnAgentTool::new(spawner.clone());
            (base.with(Arc::new(tool)), Some(spawner))
        } else {
            (base, None)
        };

        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                services,
                tools,
                tier,
                agent_id,
                sink,
                system_prompt: RwLock::new(String::new()),
                sessions: SessionManager::new(),
                active: Mutex::new(HashMap::new()),
                spawner,
            }),
        };
        runtime.refresh_system_prompt();
        runtime
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.services.config
    }

    pub fn router(&self) -> &ModelRouter {
        &self.inner.services.router
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.inner.services.registry
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.inner.services.tracker
    }

    pub fn approval(&self) -> &ApprovalService {
        &self.inner.services.approval
    }

    /// The spawner behind this runtime's spawn tool, if it has one.
    pub fn spawner(&self) -> Option<&SubAgentSpawner> {
        self.inner.spawner.as_ref()
    }

    /// The current base system prompt (without per-run memory context).
    pub fn system_prompt(&self) -> String {
        self.inner.system_prompt.read().clone()
    }

    /// Recompose the system prompt from config, tier and the tool set.
    /// Sessions pick it up at the start of their next run.
    pub fn refresh_system_prompt(&self) {
        let inner = &self.inner;
        let config = &inner.services.config;
        let base = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let can_delegate = inner.tools.has_tool(SPAWN_TOOL_NAME);
        let tool_names: Vec<String> = inner.tools.get_all().into_iter().map(|d| d.name).collect();

        let mut prompt = base;
        prompt.push_str("\n\n## Role\n");
        prompt.push_str(&tier_guidance(inner.tier, can_delegate));
        prompt.push_str("\n\n## Environment\n");
        prompt.push_str(&format!("- Agent: {}\n", inner.agent_id));
        prompt.push_str(&format!("- Workspace: {}\n", config.workspace_id));
        if tool_names.is_empty() {
            prompt.push_str("- Tools: none");
        } else {
            prompt.push_str(&format!("- Tools: {}", tool_names.join(", ")));
        }

        *inner.system_prompt.write() = prompt;
        debug!(agent = %inner.agent_id, tools = tool_names.len(), "system prompt refreshed");
    }

    /// Messages currently held for a session, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<swarm_core::Message> {
        match self.inner.sessions.get(session_id).await {
            Some(session) => session.lock().await.context.messages().to_vec(),
            None => Vec::new(),
        }
    }

    /// Cancel the run currently active on `session_id`.
    pub fn abort(&self, session_id: &str) -> bool {
        match self.inner.active.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                info!(agent = %self.inner.agent_id, session = %session_id, "run aborted");
                true
            }
            None => false,
        }
    }

    /// Run `goal` in `session_id` until the model gives a final answer,
    /// the iteration cap is hit, or the run is aborted. Fails only when the
    /// model chain is exhausted.
    pub async fn run(&self, goal: &str, session_id: &str, opts: RunOptions) -> Result<RunResult> {
        let inner = &self.inner;
        let config = &inner.services.config;
        let session = inner
            .sessions
            .get_or_create(session_id, config.soft_token_limit)
            .await;
        let mut session = session.lock().await;
        session.runs += 1;
        session.last_run_at = Some(chrono::Utc::now());

        let token = CancellationToken::new();
        inner
            .active
            .lock()
            .insert(session_id.to_string(), token.clone());

        // The spawner registers children before they run; top-level runs
        // register themselves.
        let _registration = if inner.services.registry.contains(session_id) {
            None
        } else {
            Some(inner.services.registry.scoped(
                session_id,
                Arc::new(self.clone()) as Arc<dyn AbortHandle>,
                opts.parent_session_id.as_deref(),
                inner.tier,
            ))
        };

        let mut trace = Trace::open(session_id, goal, opts.parent_trace_id);
        let mut run_guard = RunGuard {
            runtime: self.clone(),
            session_id: session_id.to_string(),
            open_trace: Some(trace.clone()),
        };
        self.save_trace(&trace).await;
        info!(
            agent = %inner.agent_id,
            tier = %inner.tier,
            session = %session_id,
            trace = %trace.id,
            "run started"
        );
        self.emit(session_id, trace.id, StreamType::Status, "started", None);

        let outcome = self
            .drive(&mut session, goal, &opts, &trace, &token)
            .await;
        run_guard.disarm();

        match outcome {
            Ok(out) => {
                let status = match out.completion {
                    Completion::Cancelled => TraceStatus::Cancelled,
                    Completion::Final | Completion::IterationLimit => TraceStatus::Completed,
                };
                trace.close(status, out.response.clone());
                self.save_trace(&trace).await;
                info!(
                    session = %session_id,
                    trace = %trace.id,
                    completion = ?out.completion,
                    iterations = out.iterations,
                    tool_calls = out.tool_calls.len(),
                    "run finished"
                );
                self.emit(
                    session_id,
                    trace.id,
                    StreamType::Status,
                    "finished",
                    Some(("completion", serde_json::json!(out.completion))),
                );
                Ok(RunResult {
                    response: out.response,
                    trace,
                    tool_calls: out.tool_calls,
                    completion: out.completion,
                    iterations: out.iterations,
                })
            }
            Err(e) => {
                trace.close(TraceStatus::Failed, e.to_string());
                self.save_trace(&trace).await;
                warn!(session = %session_id, trace = %trace.id, error = %e, "run failed");
                self.emit(
                    session_id,
                    trace.id,
                    StreamType::Status,
                    "failed",
                    Some(("error", serde_json::json!(e.to_string()))),
                );
                Err(e)
            }
        }
    }

    pub(crate) async fn save_trace(&self, trace: &Trace) {
        if let Err(e) = self.inner.services.trace_store.save_trace(trace).await {
            warn!(trace = %trace.id, error = %e, "failed to persist trace");
        }
    }

    pub(crate) async fn log(&self, kind: LogKind, content: &str, metadata: serde_json::Value) {
        if let Err(e) = self
            .inner
            .services
            .log_store
            .append(&self.inner.agent_id, kind, content, Some(metadata))
            .await
        {
            warn!(agent = %self.inner.agent_id, error = %e, "failed to append log entry");
        }
    }

    pub(crate) fn emit(
        &self,
        session_id: &str,
        trace_id: TraceId,
        stream_type: StreamType,
        delta: &str,
        meta: Option<(&str, serde_json::Value)>,
    ) {
        let mut event = StreamEvent::new(session_id, trace_id, stream_type, delta)
            .with_meta("agent_id", self.inner.agent_id.as_str());
        if let Some((key, value)) = meta {
            event = event.with_meta(key, value);
        }
        self.inner.sink.emit(event);
    }
}

/// Cleans up after a `run()`. If the run future is dropped before it
/// finishes (a parent cancelled mid-batch), the trace is closed as
/// cancelled here instead of staying open.
struct RunGuard {
    runtime: AgentRuntime,
    session_id: SessionId,
    open_trace: Option<Trace>,
}

impl RunGuard {
    /// The run reached its own close path.
    fn disarm(&mut self) {
        self.open_trace = None;
        self.runtime.inner.active.lock().remove(&self.session_id);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(mut trace) = self.open_trace.take() else {
            return;
        };
        self.runtime.inner.active.lock().remove(&self.session_id);
        trace.close(TraceStatus::Cancelled, "run dropped before completion");
        warn!(session = %self.session_id, trace = %trace.id, "run dropped, closing trace as cancelled");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.runtime.inner.services.trace_store.clone();
        handle.spawn(async move {
            if let Err(e) = store.save_trace(&trace).await {
                warn!(trace = %trace.id, error = %e, "failed to persist trace");
            }
        });
    }
}

impl AbortHandle for AgentRuntime {
    fn abort(&self, session_id: &str) -> bool {
        AgentRuntime::abort(self, session_id)
    }
}

/// Wires a runtime's collaborators. Anything not supplied gets an
/// in-process default.
pub struct AgentRuntimeBuilder {
    router: ModelRouter,
    tools: ToolRegistry,
    log_store: Option<Arc<dyn LogStore>>,
    trace_store: Option<Arc<dyn TraceStore>>,
    tracker: TokenTracker,
    approval: Option<ApprovalService>,
    registry: RuntimeRegistry,
    sink: Arc<dyn StreamSink>,
    config: AgentConfig,
    tier: Tier,
    agent_id: String,
    spawning: bool,
}

impl AgentRuntimeBuilder {
    pub fn new(router: ModelRouter) -> Self {
        Self {
            router,
            tools: ToolRegistry::new(),
            log_store: None,
            trace_store: None,
            tracker: TokenTracker::new(),
            approval: None,
            registry: RuntimeRegistry::new(),
            sink: Arc::new(NullSink),
            config: AgentConfig::default(),
            tier: Tier::Architect,
            agent_id: "swarm".to_string(),
            spawning: false,
        }
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    pub fn trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.trace_store = Some(store);
        self
    }

    /// Use one in-memory store for both logs and traces.
    pub fn memory_store(self, store: MemoryStore) -> Self {
        let store = Arc::new(store);
        self.log_store(store.clone()).trace_store(store)
    }

    pub fn tracker(mut self, tracker: TokenTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn approval(mut self, approval: ApprovalService) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn registry(mut self, registry: RuntimeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Expose the sub-agent spawn tool (when the tier may spawn).
    pub fn spawning(mut self, enabled: bool) -> Self {
        self.spawning = enabled;
        self
    }

    pub fn build(self) -> AgentRuntime {
        let default_store = Arc::new(MemoryStore::new());
        let log_store = self
            .log_store
            .unwrap_or_else(|| default_store.clone() as Arc<dyn LogStore>);
        let trace_store = self
            .trace_store
            .unwrap_or_else(|| default_store as Arc<dyn TraceStore>);
        let usage = Arc::new(UsageRecorder::new(self.tracker.clone(), trace_store.clone()));
        let services = Services {
            router: self.router,
            log_store,
            trace_store,
            tracker: self.tracker,
            approval: self.approval.unwrap_or_default(),
            registry: self.registry,
            config: self.config,
            usage,
        };
        AgentRuntime::assemble(
            services,
            self.tools,
            self.tier,
            self.agent_id,
            self.sink,
            self.spawning,
        )
    }
}
