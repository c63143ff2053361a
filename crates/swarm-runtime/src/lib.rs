//! # swarm-runtime
//!
//! The agent runtime: the turn loop that connects the model router, tools,
//! context compaction and the sub-agent hierarchy.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!              │  Agent Loop  │  ← AgentRuntime::run(goal, session)
//!              │              │
//!              │  1. Compact  │  ← ContextManager + Compactor
//!              │  2. Think    │  ← ModelRouter::chat (thinking role)
//!              │  3. Act      │  ← ToolRegistry (approval-gated)
//!              │  4. Guard    │  ← oversized tool results summarized
//!              │  5. Check    │  ← clarification / completion nudges
//!              └──────┬───────┘
//!                     │ spawn_swarm_agent
//!                     ▼
//!              ┌──────────────┐
//!              │ Sub-agents   │  ← architect → manager → workers
//!              └──────────────┘
//!                     │
//!              RuntimeRegistry    ← session forest, cascading abort
//! ```

pub mod accounting;
pub mod agent;
mod agent_loop;
pub mod compactor;
pub mod context;
pub mod registry;
pub mod session;
pub mod sub_agent;
pub mod tool_dispatch;

pub use agent::{AgentRuntime, AgentRuntimeBuilder, Completion, RunOptions, RunResult};
pub use agent_loop::{claims_completion, is_avoidable_question, is_lazy_stop};
pub use compactor::Compactor;
pub use context::ContextManager;
pub use registry::{AbortHandle, RegistrationGuard, RuntimeRegistry};
pub use sub_agent::{
    SPAWN_TOOL_NAME, SpawnAgentTool, SpawnOutcome, SpawnRequest, SpawnResult, SubAgentSpawner,
};
