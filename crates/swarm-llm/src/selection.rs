//! Turning a role into the ordered list of concrete models to try.
//!
//! Order of precedence: per-agent override chain, global role chain, legacy
//! single model, then a chain synthesized from the other roles. Every entry
//! is alias-resolved and filtered through the allow/deny policy.

use std::collections::HashSet;

use swarm_config::{ModelConfig, RoleChains, RoutingConfig};
use swarm_core::{ModelRole, Result, SwarmError};
use tracing::debug;

/// Maximum alias hops before resolution gives up.
pub const MAX_ALIAS_DEPTH: usize = 5;

/// Follow `name` through the alias table. Names that are not aliases come
/// back unchanged.
pub fn resolve_alias(name: &str, routing: &RoutingConfig) -> Result<String> {
    let mut current = name.to_string();
    let mut seen = HashSet::new();
    for _ in 0..=MAX_ALIAS_DEPTH {
        match routing.aliases.get(&current) {
            None => return Ok(current),
            Some(target) => {
                if !seen.insert(current.clone()) {
                    return Err(SwarmError::AliasResolution(format!(
                        "alias cycle at '{current}' while resolving '{name}'"
                    )));
                }
                current = target.clone();
            }
        }
    }
    Err(SwarmError::AliasResolution(format!(
        "'{name}' exceeds {MAX_ALIAS_DEPTH} alias hops"
    )))
}

/// Resolve a "provider/model" string (or alias of one) to a model.
pub fn resolve_model(spec: &str, routing: &RoutingConfig) -> Result<ModelConfig> {
    let target = resolve_alias(spec, routing)?;
    ModelConfig::parse(&target).ok_or_else(|| SwarmError::ModelNotFound(target))
}

/// Resolve one configured chain entry. The entry's qualified name or bare
/// model name may be an alias.
fn resolve_entry(entry: &ModelConfig, routing: &RoutingConfig) -> Result<ModelConfig> {
    let qualified = entry.qualified();
    if routing.aliases.contains_key(&qualified) {
        return resolve_model(&qualified, routing);
    }
    if routing.aliases.contains_key(&entry.model) {
        return resolve_model(&entry.model, routing);
    }
    Ok(entry.clone())
}

/// Whether `pattern` ("provider/model", "provider/*" or "*") covers `model`.
pub fn pattern_matches(pattern: &str, model: &ModelConfig) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(provider) => provider == model.provider,
        None => pattern == model.qualified(),
    }
}

/// Deny wins over allow; an empty allow list allows everything.
pub fn is_allowed(model: &ModelConfig, routing: &RoutingConfig) -> bool {
    if routing.deny.iter().any(|p| pattern_matches(p, model)) {
        return false;
    }
    routing.allow.is_empty() || routing.allow.iter().any(|p| pattern_matches(p, model))
}

/// The chain configured for `role`, before aliasing and policy.
fn configured_chain(
    routing: &RoutingConfig,
    role: ModelRole,
    agent_id: Option<&str>,
) -> Result<Vec<ModelConfig>> {
    if let Some(over) = agent_id.and_then(|id| routing.agent_overrides.get(id)) {
        let chain = over.chain(role);
        if !chain.is_empty() {
            debug!(agent = ?agent_id, %role, "using per-agent model override");
            return Ok(chain.to_vec());
        }
    }
    if let Some(chain) = non_empty(&routing.roles, role) {
        return Ok(chain);
    }
    if let Some(legacy) = routing.legacy_model(role) {
        return Ok(vec![resolve_model(legacy, routing)?]);
    }

    // Nothing for this role: borrow every other role's models, in role order.
    let mut synthesized = Vec::new();
    for other in ModelRole::ALL.into_iter().filter(|r| *r != role) {
        if let Some(chain) = non_empty(&routing.roles, other) {
            synthesized.extend(chain);
        } else if let Some(legacy) = routing.legacy_model(other)
            && let Ok(m) = resolve_model(legacy, routing)
        {
            synthesized.push(m);
        }
    }
    if !synthesized.is_empty() {
        debug!(%role, count = synthesized.len(), "synthesized model chain from other roles");
    }
    Ok(synthesized)
}

fn non_empty(chains: &RoleChains, role: ModelRole) -> Option<Vec<ModelConfig>> {
    let chain = chains.chain(role);
    (!chain.is_empty()).then(|| chain.to_vec())
}

/// Ordered, de-duplicated, policy-filtered candidates for one call.
pub fn resolve_candidates(
    routing: &RoutingConfig,
    role: ModelRole,
    agent_id: Option<&str>,
) -> Result<Vec<ModelConfig>> {
    let configured = configured_chain(routing, role, agent_id)?;
    if configured.is_empty() {
        return Err(SwarmError::NoModelForRole(role.to_string()));
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut blocked = Vec::new();
    for entry in &configured {
        let model = resolve_entry(entry, routing)?;
        if !seen.insert(model.clone()) {
            continue;
        }
        if is_allowed(&model, routing) {
            candidates.push(model);
        } else {
            blocked.push(model.qualified());
        }
    }

    if candidates.is_empty() {
        return Err(SwarmError::ModelNotAllowed(blocked.join(", ")));
    }
    if !blocked.is_empty() {
        debug!(%role, blocked = ?blocked, "models removed by allow/deny policy");
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(provider: &str, model: &str) -> ModelConfig {
        ModelConfig::new(provider, model)
    }

    #[test]
    fn test_alias_chain_resolves() {
        let mut routing = RoutingConfig::default();
        routing.aliases.insert("smart".into(), "best".into());
        routing.aliases.insert("best".into(), "openai/gpt-4o".into());
        assert_eq!(resolve_alias("smart", &routing).unwrap(), "openai/gpt-4o");
        assert_eq!(resolve_alias("plain", &routing).unwrap(), "plain");
    }

    #[test]
    fn test_alias_cycle_is_error() {
        let mut routing = RoutingConfig::default();
        routing.aliases.insert("a".into(), "b".into());
        routing.aliases.insert("b".into(), "a".into());
        let err = resolve_alias("a", &routing).unwrap_err();
        assert!(matches!(err, SwarmError::AliasResolution(_)));
    }

    #[test]
    fn test_alias_depth_is_bounded() {
        let mut routing = RoutingConfig::default();
        for i in 0..8 {
            routing.aliases.insert(format!("a{i}"), format!("a{}", i + 1));
        }
        assert!(resolve_alias("a0", &routing).is_err());
        // Exactly MAX_ALIAS_DEPTH hops is fine.
        assert_eq!(resolve_alias("a3", &routing).unwrap(), "a8");
    }

    #[test]
    fn test_provider_wildcards() {
        let mut routing = RoutingConfig::default();
        routing.deny = vec!["groq/*".into()];
        assert!(!is_allowed(&m("groq", "llama"), &routing));
        assert!(is_allowed(&m("openai", "gpt-4o"), &routing));

        routing.allow = vec!["openai/*".into()];
        assert!(!is_allowed(&m("ollama", "qwen"), &routing));
        assert!(is_allowed(&m("openai", "o3"), &routing));
    }

    #[test]
    fn test_agent_override_wins() {
        let mut routing = RoutingConfig::default();
        routing.roles.thinking = vec![m("openai", "gpt-4o")];
        let mut over = RoleChains::default();
        over.thinking = vec![m("groq", "llama")];
        routing.agent_overrides.insert("reviewer".into(), over);

        let c = resolve_candidates(&routing, ModelRole::Thinking, Some("reviewer")).unwrap();
        assert_eq!(c, vec![m("groq", "llama")]);
        let c = resolve_candidates(&routing, ModelRole::Thinking, Some("other")).unwrap();
        assert_eq!(c, vec![m("openai", "gpt-4o")]);
    }

    #[test]
    fn test_legacy_then_synthesized() {
        let mut routing = RoutingConfig::default();
        routing.fast_model = Some("openai/gpt-4o-mini".into());
        let c = resolve_candidates(&routing, ModelRole::Fast, None).unwrap();
        assert_eq!(c, vec![m("openai", "gpt-4o-mini")]);

        routing.roles.thinking = vec![m("openai", "gpt-4o")];
        let c = resolve_candidates(&routing, ModelRole::Local, None).unwrap();
        assert_eq!(c, vec![m("openai", "gpt-4o"), m("openai", "gpt-4o-mini")]);
    }

    #[test]
    fn test_nothing_configured() {
        let routing = RoutingConfig::default();
        let err = resolve_candidates(&routing, ModelRole::Thinking, None).unwrap_err();
        assert!(matches!(err, SwarmError::NoModelForRole(_)));
    }

    #[test]
    fn test_everything_denied() {
        let mut routing = RoutingConfig::default();
        routing.roles.thinking = vec![m("groq", "llama")];
        routing.deny = vec!["groq/*".into()];
        let err = resolve_candidates(&routing, ModelRole::Thinking, None).unwrap_err();
        assert!(matches!(err, SwarmError::ModelNotAllowed(_)));
    }

    #[test]
    fn test_chain_entries_resolve_aliases_and_dedup() {
        let mut routing = RoutingConfig::default();
        routing.aliases.insert("fav".into(), "openai/gpt-4o".into());
        routing.roles.thinking = vec![m("any", "fav"), m("openai", "gpt-4o"), m("groq", "llama")];
        let c = resolve_candidates(&routing, ModelRole::Thinking, None).unwrap();
        assert_eq!(c, vec![m("openai", "gpt-4o"), m("groq", "llama")]);
    }
}
