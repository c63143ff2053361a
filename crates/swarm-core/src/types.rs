use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a session. Caller-chosen, so a plain string.
pub type SessionId = String;

/// Unique identifier for a trace (one `run()` invocation).
pub type TraceId = Uuid;

/// Identifier of the agent persona a runtime acts as.
pub type AgentId = String;

/// Logical purpose of a model call, resolved to a concrete model by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Thinking,
    Fast,
    Local,
}

impl ModelRole {
    pub const ALL: [ModelRole; 3] = [ModelRole::Thinking, ModelRole::Fast, ModelRole::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Thinking => "thinking",
            ModelRole::Fast => "fast",
            ModelRole::Local => "local",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thinking" => Ok(ModelRole::Thinking),
            "fast" => Ok(ModelRole::Fast),
            "local" => Ok(ModelRole::Local),
            other => Err(format!("unknown model role '{other}'")),
        }
    }
}

/// Agent hierarchy level. Constrains who may spawn whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Architect,
    Manager,
    Worker,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Architect => "architect",
            Tier::Manager => "manager",
            Tier::Worker => "worker",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "architect" => Ok(Tier::Architect),
            "manager" => Ok(Tier::Manager),
            "worker" => Ok(Tier::Worker),
            other => Err(format!("unknown agent tier '{other}'")),
        }
    }
}
