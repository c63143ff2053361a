//! # swarm-core
//!
//! Core types, traits, and primitives for the Swarm agent engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod record;
pub mod store;
pub mod tool;
pub mod types;

pub use error::{ModelFailure, Result, SwarmError};
pub use event::{NullSink, StreamEvent, StreamHub, StreamSink, StreamType};
pub use message::{Message, Role};
pub use record::{LogEntry, LogKind, TokenUsageRecord, ToolCallRecord, Trace, TraceStatus};
pub use store::{LogStore, MemoryStore, TraceStore};
pub use tool::{
    AgentTool, ToolCall, ToolContext, ToolDefinition, ToolEffect, ToolOutput, ToolRegistry,
};
pub use types::*;
