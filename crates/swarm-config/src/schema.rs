use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use swarm_core::ModelRole;

/// Root configuration, mapped to `swarm.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub agent: AgentConfig,
    pub routing: RoutingConfig,
    pub proxy: ProxyConfig,
    /// Direct provider endpoints, keyed by provider name ("openai", "groq", ...).
    pub providers: HashMap<String, ProviderConfig>,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on loop iterations per `run()`.
    pub max_iterations: u32,
    /// Estimated-token threshold that triggers history compaction.
    pub soft_token_limit: usize,
    /// Messages at the tail of history that compaction never touches.
    pub keep_trailing_messages: usize,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Base system prompt. Tier guidance and memory context are appended.
    pub system_prompt: Option<String>,
    /// Token limit used when guarding oversized tool results. Results above
    /// half this value are summarized before they enter history.
    pub tool_result_guard_limit: usize,
    /// Maximum forcing nudges (clarification, lazy stop, verification) per run.
    pub max_nudges: u32,
    /// Workspace id handed to tools through `ToolContext`.
    pub workspace_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            soft_token_limit: 100_000,
            keep_trailing_messages: 10,
            max_tokens: 8192,
            temperature: 0.7,
            system_prompt: None,
            tool_result_guard_limit: 16_000,
            max_nudges: 3,
            workspace_id: "default".into(),
        }
    }
}

// ── Routing ────────────────────────────────────────────────────

/// One concrete model on one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse "provider/model". The model part may itself contain slashes
    /// ("openrouter/meta-llama/llama-3-70b").
    pub fn parse(spec: &str) -> Option<Self> {
        let (provider, model) = spec.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }

    /// "provider/model".
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Ordered fallback chains, one per role. First entry is the primary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleChains {
    pub thinking: Vec<ModelConfig>,
    pub fast: Vec<ModelConfig>,
    pub local: Vec<ModelConfig>,
}

impl RoleChains {
    pub fn chain(&self, role: ModelRole) -> &[ModelConfig] {
        match role {
            ModelRole::Thinking => &self.thinking,
            ModelRole::Fast => &self.fast,
            ModelRole::Local => &self.local,
        }
    }

    pub fn chain_mut(&mut self, role: ModelRole) -> &mut Vec<ModelConfig> {
        match role {
            ModelRole::Thinking => &mut self.thinking,
            ModelRole::Fast => &mut self.fast,
            ModelRole::Local => &mut self.local,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty() && self.fast.is_empty() && self.local.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub roles: RoleChains,
    /// Single-model fallbacks used when a role has no chain ("provider/model").
    pub thinking_model: Option<String>,
    pub fast_model: Option<String>,
    pub local_model: Option<String>,
    /// Extra calls per candidate on transient errors.
    pub max_retries: u32,
    /// Backoff base between retries, doubled each attempt.
    pub retry_base_delay_ms: u64,
    pub fallback_on_rate_limit: bool,
    pub fallback_on_error: bool,
    /// Per-call HTTP timeout.
    pub request_timeout_secs: u64,
    /// Short names for models. Values may point at other aliases.
    pub aliases: HashMap<String, String>,
    /// If non-empty, only matching models may be called. Entries are
    /// "provider/model" or "provider/*".
    pub allow: Vec<String>,
    /// Models that may never be called. Same syntax as `allow`.
    pub deny: Vec<String>,
    /// Per-agent role chains, consulted before the global chains.
    pub agent_overrides: HashMap<String, RoleChains>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            roles: RoleChains::default(),
            thinking_model: None,
            fast_model: None,
            local_model: None,
            max_retries: 2,
            retry_base_delay_ms: 500,
            fallback_on_rate_limit: true,
            fallback_on_error: true,
            request_timeout_secs: 120,
            aliases: HashMap::new(),
            allow: vec![],
            deny: vec![],
            agent_overrides: HashMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn legacy_model(&self, role: ModelRole) -> Option<&str> {
        match role {
            ModelRole::Thinking => self.thinking_model.as_deref(),
            ModelRole::Fast => self.fast_model.as_deref(),
            ModelRole::Local => self.local_model.as_deref(),
        }
    }
}

// ── Proxy / providers ──────────────────────────────────────────

/// A local OpenAI-compatible proxy. Preferred over direct provider calls
/// when enabled and reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Environment variable holding the proxy key, if it wants one.
    pub api_key_env: Option<String>,
    /// Timeout of the `GET {base_url}/models` reachability probe.
    pub probe_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:4000/v1".into(),
            api_key_env: None,
            probe_timeout_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible base URL. Well-known providers have a built-in default.
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Defaults to `<PROVIDER>_API_KEY`.
    pub api_key_env: Option<String>,
}

/// Built-in OpenAI-compatible endpoints.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "anthropic" => Some("https://api.anthropic.com/v1"),
        "ollama" => Some("http://127.0.0.1:11434/v1"),
        "lmstudio" => Some("http://127.0.0.1:1234/v1"),
        _ => None,
    }
}

// ── Approval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub yes_no_timeout_secs: u64,
    pub free_text_timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            yes_no_timeout_secs: 60,
            free_text_timeout_secs: 300,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn", "error" or a full EnvFilter directive.
    pub level: String,
    /// "pretty", "compact" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl SwarmConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Agent loop ───
        if self.agent.max_iterations == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_iterations".into(),
                message: "max_iterations is 0, the agent can never call a model".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "agent.temperature".into(),
                message: format!("temperature {} is out of range", self.agent.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }
        if self.agent.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_tokens".into(),
                message: "max_tokens is 0, the agent won't produce output".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 8192".into()),
            });
        }
        if self.agent.soft_token_limit == 0 {
            warnings.push(ConfigWarning {
                field: "agent.soft_token_limit".into(),
                message: "soft_token_limit is 0, history would compact every iteration".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set below the model's context window, e.g. 100000".into()),
            });
        }
        if self.agent.keep_trailing_messages == 0 {
            warnings.push(ConfigWarning {
                field: "agent.keep_trailing_messages".into(),
                message: "compaction may summarize the latest turn".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Keep at least the last few messages, e.g. 10".into()),
            });
        }

        // ── Routing chains ───
        let mut chains: Vec<(String, &ModelConfig)> = Vec::new();
        for role in ModelRole::ALL {
            for m in self.routing.roles.chain(role) {
                chains.push((format!("routing.roles.{role}"), m));
            }
        }
        for (agent, over) in &self.routing.agent_overrides {
            for role in ModelRole::ALL {
                for m in over.chain(role) {
                    chains.push((format!("routing.agent_overrides.{agent}.{role}"), m));
                }
            }
        }
        for (field, m) in chains {
            if m.provider.is_empty() || m.model.is_empty() {
                warnings.push(ConfigWarning {
                    field,
                    message: format!("chain entry '{}' is missing provider or model", m),
                    severity: WarningSeverity::Error,
                    hint: Some("Each entry needs both: { provider = \"openai\", model = \"gpt-4o\" }".into()),
                });
            }
        }

        for role in ModelRole::ALL {
            if let Some(legacy) = self.routing.legacy_model(role)
                && ModelConfig::parse(legacy).is_none()
                && !self.routing.aliases.contains_key(legacy)
            {
                warnings.push(ConfigWarning {
                    field: format!("routing.{role}_model"),
                    message: format!("model '{}' should be in 'provider/model' format", legacy),
                    severity: WarningSeverity::Warning,
                    hint: Some("Use e.g. 'openai/gpt-4o' or define an alias".into()),
                });
            }
        }

        let nothing_routed = self.routing.roles.is_empty()
            && ModelRole::ALL
                .iter()
                .all(|r| self.routing.legacy_model(*r).is_none());
        if nothing_routed {
            warnings.push(ConfigWarning {
                field: "routing".into(),
                message: "no models configured for any role".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Add [[routing.roles.thinking]] entries or set routing.thinking_model".into()),
            });
        }

        for (alias, target) in &self.routing.aliases {
            if alias == target {
                warnings.push(ConfigWarning {
                    field: format!("routing.aliases.{alias}"),
                    message: "alias points at itself".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        for pattern in &self.routing.deny {
            if self.routing.allow.contains(pattern) {
                warnings.push(ConfigWarning {
                    field: "routing.deny".into(),
                    message: format!("'{}' is both allowed and denied; deny wins", pattern),
                    severity: WarningSeverity::Info,
                    hint: None,
                });
            }
        }

        if self.routing.request_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "routing.request_timeout_secs".into(),
                message: "timeout is 0, every model call would fail immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 120".into()),
            });
        }

        // ── Approval ───
        if self.approval.yes_no_timeout_secs == 0 || self.approval.free_text_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "approval".into(),
                message: "a zero timeout denies every approval request".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Defaults are 60s for yes/no and 300s for free text".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
