use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, SwarmError};
use crate::types::{AgentId, SessionId, Tier};

/// How a tool affects the world. Drives the runtime's autonomy heuristics
/// and decides whether calls in one turn may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    /// Read-only discovery: listing, reading, searching.
    Explore,
    /// Changes state: writes, deletes, commands with side effects.
    Mutate,
    #[default]
    Neutral,
}

/// Description of a tool that can be called by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name, e.g. "file_write", "spawn_swarm_agent".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    #[serde(default)]
    pub effect: ToolEffect,
    /// Execution waits for a human yes/no before running.
    #[serde(default)]
    pub requires_approval: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            effect: ToolEffect::Neutral,
            requires_approval: false,
        }
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.effect == ToolEffect::Mutate
    }

    pub fn is_exploratory(&self) -> bool {
        self.effect == ToolEffect::Explore
    }

    /// OpenAI `tools` entry for this definition.
    pub fn provider_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// What a tool returns on success. `is_error` lets a tool report a soft
/// failure to the model without raising.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Ambient information handed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub workspace_id: String,
    pub trace_id: Uuid,
    pub tier: Tier,
}

/// Anything the agent can call.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// The set of tools one runtime exposes to its model.
///
/// Cheap to clone; children get a clone of their parent's registry with
/// individual tools replaced or removed.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        let name = tool.definition().name;
        if let Some(slot) = self
            .tools
            .iter_mut()
            .find(|t| t.definition().name == name)
        {
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn with(mut self, tool: Arc<dyn AgentTool>) -> Self {
        self.register(tool);
        self
    }

    /// A copy of this registry without the named tool.
    pub fn without(&self, name: &str) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| t.definition().name != name)
                .cloned()
                .collect(),
        }
    }

    pub fn get_all(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Projection of every tool into the provider's `tools` array.
    pub fn provider_schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| t.definition().provider_schema())
            .collect()
    }

    /// Validate `args` against the tool's schema and run it.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| SwarmError::ToolNotFound(name.to_string()))?;
        validate_arguments(&tool.definition(), &args)?;
        tool.execute(args, ctx).await
    }
}

/// Shallow JSON-schema check: object-typed arguments and required keys present.
fn validate_arguments(def: &ToolDefinition, args: &Value) -> Result<()> {
    let declares_object = def
        .parameters
        .get("type")
        .and_then(|t| t.as_str())
        .is_some_and(|t| t == "object");
    if !declares_object {
        return Ok(());
    }
    let Some(obj) = args.as_object() else {
        return Err(SwarmError::InvalidArguments {
            tool: def.name.clone(),
            reason: "arguments must be a JSON object".into(),
        });
    };
    let required = def
        .parameters
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(SwarmError::InvalidArguments {
            tool: def.name.clone(),
            reason: format!("missing required field(s): {}", missing.join(", ")),
        });
    }
    Ok(())
}
