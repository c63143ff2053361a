//! # swarm-autonomy
//!
//! Human-in-the-loop approvals, token usage accounting and the agent tier
//! policy.

pub mod approval;
pub mod hierarchy;
pub mod usage;

pub use approval::{ApprovalKind, ApprovalOutcome, ApprovalRequest, ApprovalService};
pub use hierarchy::{SPAWN_RULES, SpawnRule, allowed_children, can_spawn, check_spawn};
pub use usage::{TokenTracker, UsageState, UsageTotals};
