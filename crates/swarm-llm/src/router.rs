use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, info, warn};

use swarm_config::{ModelConfig, ProviderConfig, ProxyConfig, RoutingConfig, default_base_url};
use swarm_core::{Message, ModelFailure, ModelRole, Result, SwarmError};

use crate::openai::OpenAiProvider;
use crate::pricing;
use crate::provider::{LlmProvider, LlmRequest, StopReason, StreamChunk, Usage};
use crate::selection;

/// Upper bound on a single backoff sleep, whatever the provider asks for.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Per-call knobs for [`ModelRouter::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// OpenAI `tools` entries.
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Agent persona, for per-agent routing overrides.
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    /// Provider-reported usage with the estimated cost filled in.
    pub usage: Usage,
    /// Qualified id of the model that answered, e.g. "openai/gpt-4o".
    pub model: String,
    pub stop_reason: StopReason,
}

/// Supplies API keys for direct provider calls.
pub trait CredentialResolver: Send + Sync {
    fn api_key(&self, provider: &str, config: Option<&ProviderConfig>) -> Option<String>;
}

/// Reads `api_key_env` from the provider config, or `<PROVIDER>_API_KEY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialResolver for EnvCredentials {
    fn api_key(&self, provider: &str, config: Option<&ProviderConfig>) -> Option<String> {
        let var = config
            .and_then(|c| c.api_key_env.clone())
            .unwrap_or_else(|| {
                format!("{}_API_KEY", provider.to_ascii_uppercase().replace('-', "_"))
            });
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

/// Which way calls leave the process. Chosen once and cached.
#[derive(Clone)]
enum Backend {
    /// Everything goes to one OpenAI-compatible proxy with qualified model ids.
    Proxy(Arc<dyn LlmProvider>),
    /// One client per provider, bare model ids.
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Proxy,
    Direct,
}

struct RouterInner {
    routing: RwLock<Arc<RoutingConfig>>,
    proxy: ProxyConfig,
    provider_configs: HashMap<String, ProviderConfig>,
    credentials: Arc<dyn CredentialResolver>,
    backend: OnceCell<Backend>,
    /// Direct clients, built on first use unless injected.
    clients: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    /// When false, only injected clients exist.
    build_clients: bool,
    default_temperature: f32,
    default_max_tokens: u32,
}

/// Resolves model roles to concrete calls, with retry and fallback across
/// the configured chain. Cheap to clone.
#[derive(Clone)]
pub struct ModelRouter {
    inner: Arc<RouterInner>,
}

/// Check if an error is transient and worth retrying.
pub fn is_retryable(err: &SwarmError) -> bool {
    match err {
        SwarmError::RateLimited { .. } | SwarmError::Timeout(_) => true,
        SwarmError::LlmProvider(msg) => {
            msg.starts_with("HTTP 429")
                || msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
                || msg.starts_with("HTTP 529")
                || msg.contains("timed out")
                || msg.contains("connection reset")
                || msg.contains("connection closed")
                || msg.contains("overloaded")
        }
        _ => false,
    }
}

/// Extract retry-after hint from a RateLimited error (in seconds).
fn retry_after_hint(err: &SwarmError) -> Option<u64> {
    match err {
        SwarmError::RateLimited { retry_after_secs } if *retry_after_secs > 0 => {
            Some(*retry_after_secs)
        }
        _ => None,
    }
}

impl ModelRouter {
    /// Router over the configured proxy/direct providers. The backend is
    /// probed on [`initialize`](Self::initialize) or on the first call.
    pub fn new(
        routing: RoutingConfig,
        proxy: ProxyConfig,
        providers: HashMap<String, ProviderConfig>,
    ) -> Self {
        Self::build(routing, proxy, providers, HashMap::new(), true)
    }

    /// Router with pre-built direct clients keyed by provider name and no
    /// proxy. Unknown providers fail with `ModelNotFound`.
    pub fn with_providers(
        routing: RoutingConfig,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
    ) -> Self {
        let proxy = ProxyConfig {
            enabled: false,
            ..Default::default()
        };
        Self::build(routing, proxy, HashMap::new(), providers, false)
    }

    /// Router that sends everything through `proxy`.
    pub fn with_proxy(routing: RoutingConfig, proxy: Arc<dyn LlmProvider>) -> Self {
        let router = Self::build(
            routing,
            ProxyConfig::default(),
            HashMap::new(),
            HashMap::new(),
            false,
        );
        // Freshly created cell, cannot already be set.
        let _ = router.inner.backend.set(Backend::Proxy(proxy));
        router
    }

    fn build(
        routing: RoutingConfig,
        proxy: ProxyConfig,
        provider_configs: HashMap<String, ProviderConfig>,
        clients: HashMap<String, Arc<dyn LlmProvider>>,
        build_clients: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routing: RwLock::new(Arc::new(routing)),
                proxy,
                provider_configs,
                credentials: Arc::new(EnvCredentials),
                backend: OnceCell::new(),
                clients: RwLock::new(clients),
                build_clients,
                default_temperature: 0.7,
                default_max_tokens: 8192,
            }),
        }
    }

    /// Replace the credential source. Only valid before the router is shared.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.credentials = credentials;
        }
        self
    }

    /// Defaults used when `ChatOptions` leaves temperature / max_tokens unset.
    pub fn with_defaults(mut self, temperature: f32, max_tokens: u32) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.default_temperature = temperature;
            inner.default_max_tokens = max_tokens;
        }
        self
    }

    /// Probe the proxy and pick the backend. Idempotent; later calls return
    /// the cached choice.
    pub async fn initialize(&self) -> BackendMode {
        let backend = self
            .inner
            .backend
            .get_or_init(|| async { self.probe().await })
            .await;
        match backend {
            Backend::Proxy(_) => BackendMode::Proxy,
            Backend::Direct => BackendMode::Direct,
        }
    }

    async fn probe(&self) -> Backend {
        let cfg = &self.inner.proxy;
        if !cfg.enabled {
            info!("proxy disabled, using direct provider calls");
            return Backend::Direct;
        }
        let key = cfg
            .api_key_env
            .as_deref()
            .and_then(|v| std::env::var(v).ok());
        let proxy = OpenAiProvider::new("proxy", cfg.base_url.clone(), key);
        let probe = proxy
            .clone()
            .with_timeout(Duration::from_millis(cfg.probe_timeout_ms))
            .health_check()
            .await;
        match probe {
            Ok(()) => {
                info!(url = %cfg.base_url, "model proxy reachable, routing through proxy");
                let timeout = Duration::from_secs(self.routing().request_timeout_secs);
                Backend::Proxy(Arc::new(proxy.with_timeout(timeout)))
            }
            Err(e) => {
                info!(url = %cfg.base_url, error = %e, "model proxy unreachable, using direct provider calls");
                Backend::Direct
            }
        }
    }

    async fn backend(&self) -> Backend {
        self.initialize().await;
        self.inner
            .backend
            .get()
            .cloned()
            .unwrap_or(Backend::Direct)
    }

    /// Current routing snapshot.
    pub fn routing(&self) -> Arc<RoutingConfig> {
        Arc::clone(&self.inner.routing.read())
    }

    /// Swap the routing config. Calls already in flight keep the snapshot
    /// they started with.
    pub fn update_routing(&self, routing: RoutingConfig) {
        *self.inner.routing.write() = Arc::new(routing);
        info!("model routing updated");
    }

    /// Ordered candidates `chat(role)` would try right now.
    pub fn candidates(&self, role: ModelRole, agent_id: Option<&str>) -> Result<Vec<ModelConfig>> {
        selection::resolve_candidates(&self.routing(), role, agent_id)
    }

    /// The client and wire model id for one candidate.
    fn target(
        &self,
        backend: &Backend,
        model: &ModelConfig,
    ) -> Result<(Arc<dyn LlmProvider>, String)> {
        match backend {
            Backend::Proxy(p) => Ok((Arc::clone(p), model.qualified())),
            Backend::Direct => Ok((self.direct_client(&model.provider)?, model.model.clone())),
        }
    }

    fn direct_client(&self, provider: &str) -> Result<Arc<dyn LlmProvider>> {
        if let Some(c) = self.inner.clients.read().get(provider) {
            return Ok(Arc::clone(c));
        }
        if !self.inner.build_clients {
            return Err(SwarmError::ModelNotFound(format!(
                "no client for provider '{provider}'"
            )));
        }
        let config = self.inner.provider_configs.get(provider);
        let base_url = config
            .and_then(|c| c.base_url.clone())
            .or_else(|| default_base_url(provider).map(str::to_string))
            .ok_or_else(|| {
                SwarmError::ModelNotFound(format!("no base_url known for provider '{provider}'"))
            })?;
        let key = self.inner.credentials.api_key(provider, config);
        let timeout = Duration::from_secs(self.routing().request_timeout_secs);
        let client: Arc<dyn LlmProvider> =
            Arc::new(OpenAiProvider::new(provider, base_url, key).with_timeout(timeout));
        debug!(provider, "created direct provider client");
        Ok(Arc::clone(
            self.inner
                .clients
                .write()
                .entry(provider.to_string())
                .or_insert(client),
        ))
    }

    /// Walk the candidate chain, calling `call` with retries per candidate.
    async fn walk_chain<T, F, Fut>(
        &self,
        role: ModelRole,
        agent_id: Option<&str>,
        mut call: F,
    ) -> Result<(T, ModelConfig)>
    where
        F: FnMut(Arc<dyn LlmProvider>, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let routing = self.routing();
        let candidates = selection::resolve_candidates(&routing, role, agent_id)?;
        let backend = self.backend().await;
        let mut failures = Vec::new();

        for candidate in candidates {
            let qualified = candidate.qualified();
            let (provider, wire_model) = match self.target(&backend, &candidate) {
                Ok(t) => t,
                Err(e) => {
                    warn!(model = %qualified, error = %e, "model unavailable");
                    failures.push(ModelFailure {
                        model: qualified,
                        attempts: 0,
                        error: e.to_string(),
                    });
                    if routing.fallback_on_error {
                        continue;
                    }
                    break;
                }
            };

            let mut attempts = 0u32;
            let err = loop {
                attempts += 1;
                match call(Arc::clone(&provider), wire_model.clone()).await {
                    Ok(value) => return Ok((value, candidate)),
                    Err(e) if is_retryable(&e) && attempts <= routing.max_retries => {
                        let delay = retry_after_hint(&e)
                            .map(|s| s * 1000)
                            .unwrap_or_else(|| {
                                routing
                                    .retry_base_delay_ms
                                    .saturating_mul(2u64.saturating_pow(attempts - 1))
                            })
                            .min(MAX_BACKOFF_MS);
                        warn!(
                            model = %qualified,
                            attempt = attempts,
                            max = routing.max_retries,
                            delay_ms = delay,
                            error = %e,
                            "retrying after transient error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    Err(e) => break e,
                }
            };

            let rate_limited = err.is_rate_limit();
            warn!(model = %qualified, attempts, error = %err, "model failed");
            failures.push(ModelFailure {
                model: qualified,
                attempts,
                error: err.to_string(),
            });

            let advance = if rate_limited {
                routing.fallback_on_rate_limit
            } else {
                routing.fallback_on_error
            };
            if !advance {
                break;
            }
        }

        Err(SwarmError::ModelChainExhausted {
            role: role.to_string(),
            failures,
        })
    }

    fn request(
        &self,
        wire_model: String,
        messages: &[Message],
        opts: &ChatOptions,
        stream: bool,
    ) -> LlmRequest {
        LlmRequest {
            model: wire_model,
            messages: messages.to_vec(),
            tools: opts.tools.clone(),
            max_tokens: opts.max_tokens.unwrap_or(self.inner.default_max_tokens),
            temperature: opts.temperature.unwrap_or(self.inner.default_temperature),
            stream,
        }
    }

    /// One chat completion for `role`, retried and failed over per the
    /// routing policy.
    pub async fn chat(
        &self,
        role: ModelRole,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<ChatResponse> {
        let (resp, model) = self
            .walk_chain(role, opts.agent_id.as_deref(), |provider, wire_model| {
                let request = self.request(wire_model, messages, opts, false);
                async move { provider.complete(&request).await }
            })
            .await?;

        let qualified = model.qualified();
        let mut usage = resp.usage;
        usage.estimated_cost_usd =
            pricing::estimate_cost(&qualified, usage.prompt_tokens, usage.completion_tokens);
        debug!(
            model = %qualified,
            %role,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "chat completed"
        );
        Ok(ChatResponse {
            message: resp.message,
            usage,
            model: qualified,
            stop_reason: resp.stop_reason,
        })
    }

    /// Streaming chat. Only the proxy backend streams; direct mode makes one
    /// non-streaming call and replays it as a chunk sequence.
    pub async fn chat_stream(
        &self,
        role: ModelRole,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        if matches!(self.backend().await, Backend::Proxy(_)) {
            let (rx, _) = self
                .walk_chain(role, opts.agent_id.as_deref(), |provider, wire_model| {
                    let request = self.request(wire_model, messages, opts, true);
                    async move { provider.stream(&request).await }
                })
                .await?;
            return Ok(rx);
        }

        let resp = self.chat(role, messages, opts).await?;
        let (tx, rx) = mpsc::channel(resp.message.tool_calls.len() + 3);
        if !resp.message.content.is_empty() {
            let _ = tx.try_send(StreamChunk::TextDelta(resp.message.content));
        }
        for tc in resp.message.tool_calls {
            let _ = tx.try_send(StreamChunk::ToolCall(tc));
        }
        let _ = tx.try_send(StreamChunk::Usage(resp.usage));
        let _ = tx.try_send(StreamChunk::Done(resp.stop_reason));
        Ok(rx)
    }
}
