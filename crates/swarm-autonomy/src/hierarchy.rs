//! Who may spawn whom. The one place the tier policy lives.

use swarm_core::Tier;

/// One permitted parent → child edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRule {
    pub parent: Tier,
    pub child: Tier,
    /// Live children of this tier a parent may hold at once.
    pub max_live: Option<usize>,
}

/// Architects delegate to a single manager; managers fan out to workers;
/// workers never spawn.
pub const SPAWN_RULES: &[SpawnRule] = &[
    SpawnRule {
        parent: Tier::Architect,
        child: Tier::Manager,
        max_live: Some(1),
    },
    SpawnRule {
        parent: Tier::Manager,
        child: Tier::Worker,
        max_live: None,
    },
];

fn rule(parent: Tier, child: Tier) -> Option<&'static SpawnRule> {
    SPAWN_RULES
        .iter()
        .find(|r| r.parent == parent && r.child == child)
}

/// Tiers `parent` may create.
pub fn allowed_children(parent: Tier) -> Vec<Tier> {
    SPAWN_RULES
        .iter()
        .filter(|r| r.parent == parent)
        .map(|r| r.child)
        .collect()
}

/// Whether `tier` may spawn anything at all.
pub fn can_spawn(tier: Tier) -> bool {
    SPAWN_RULES.iter().any(|r| r.parent == tier)
}

/// Check a spawn request. `live_of_child_tier` is how many children of
/// `child`'s tier the parent currently has registered. The error is a
/// refusal meant for the model, not a failure.
pub fn check_spawn(parent: Tier, child: Tier, live_of_child_tier: usize) -> Result<(), String> {
    let Some(rule) = rule(parent, child) else {
        let allowed = allowed_children(parent);
        return Err(if allowed.is_empty() {
            format!(
                "Hierarchy violation: a {parent} cannot create sub-agents. Do the work yourself with the tools you have."
            )
        } else {
            let names: Vec<&str> = allowed.iter().map(|t| t.as_str()).collect();
            format!(
                "Hierarchy violation: a {parent} cannot create a {child}. A {parent} may only create: {}. Delegate through that tier instead.",
                names.join(", ")
            )
        });
    };
    if let Some(max) = rule.max_live
        && live_of_child_tier >= max
    {
        return Err(format!(
            "Hierarchy violation: a {parent} may only have {max} active {child} at a time and already has {live_of_child_tier}. Give the existing {child} the additional work instead."
        ));
    }
    Ok(())
}
