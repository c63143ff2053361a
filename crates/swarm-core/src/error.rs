use thiserror::Error;

/// One model that was tried and failed while walking a role chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFailure {
    /// Qualified model id, e.g. "openai/gpt-4o".
    pub model: String,
    /// How many calls were made against this model.
    pub attempts: u32,
    pub error: String,
}

impl std::fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} attempt{}): {}",
            self.model,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

fn format_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified error type for the Swarm engine.
#[derive(Error, Debug)]
pub enum SwarmError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("llm request timed out after {0}s")]
    Timeout(u64),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("no model configured for role '{0}'")]
    NoModelForRole(String),

    #[error("model '{0}' is blocked by the routing allow/deny policy")]
    ModelNotAllowed(String),

    #[error("alias resolution failed: {0}")]
    AliasResolution(String),

    #[error("all models failed for role '{role}': {}", format_failures(.failures))]
    ModelChainExhausted {
        role: String,
        failures: Vec<ModelFailure>,
    },

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    // ── Persistence errors ─────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SwarmError {
    /// Whether this error came from the provider signalling a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            SwarmError::RateLimited { .. } => true,
            SwarmError::LlmProvider(msg) => msg.starts_with("HTTP 429"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
