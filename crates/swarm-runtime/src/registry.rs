use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use swarm_core::{SessionId, Tier};

/// Something that can stop the run bound to a session.
pub trait AbortHandle: Send + Sync {
    fn abort(&self, session_id: &str) -> bool;
}

struct Registration {
    handle: Arc<dyn AbortHandle>,
    parent: Option<SessionId>,
    tier: Tier,
    /// Insertion order is abort order.
    children: Vec<SessionId>,
}

/// Live runtimes keyed by session id, linked into a forest by parent
/// session. Cheap to clone; clones share the forest.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    inner: Arc<Mutex<HashMap<SessionId, Registration>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the registration for `session_id`.
    pub fn register(
        &self,
        session_id: &str,
        handle: Arc<dyn AbortHandle>,
        parent: Option<&str>,
        tier: Tier,
    ) {
        let mut map = self.inner.lock();
        insert(&mut map, session_id, handle, parent, tier);
        debug!(session = %session_id, parent = ?parent, %tier, "runtime registered");
    }

    /// Register a child only if `admit` accepts the parent's current number
    /// of live children of `tier`. Check and insert happen under one lock.
    pub fn register_child<F>(
        &self,
        session_id: &str,
        handle: Arc<dyn AbortHandle>,
        parent: &str,
        tier: Tier,
        admit: F,
    ) -> Result<(), String>
    where
        F: FnOnce(usize) -> Result<(), String>,
    {
        let mut map = self.inner.lock();
        admit(live_children(&map, parent, tier))?;
        insert(&mut map, session_id, handle, Some(parent), tier);
        debug!(session = %session_id, parent = %parent, %tier, "child runtime registered");
        Ok(())
    }

    /// Remove a session and drop it from every child list.
    pub fn unregister(&self, session_id: &str) -> bool {
        let mut map = self.inner.lock();
        let removed = map.remove(session_id).is_some();
        for reg in map.values_mut() {
            reg.children.retain(|c| c != session_id);
        }
        if removed {
            debug!(session = %session_id, "runtime unregistered");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn parent_of(&self, session_id: &str) -> Option<SessionId> {
        self.inner
            .lock()
            .get(session_id)
            .and_then(|r| r.parent.clone())
    }

    pub fn tier_of(&self, session_id: &str) -> Option<Tier> {
        self.inner.lock().get(session_id).map(|r| r.tier)
    }

    pub fn children_of(&self, session_id: &str) -> Vec<SessionId> {
        self.inner
            .lock()
            .get(session_id)
            .map(|r| r.children.clone())
            .unwrap_or_default()
    }

    /// Live children of `parent` running at `tier`.
    pub fn count_children(&self, parent: &str, tier: Tier) -> usize {
        live_children(&self.inner.lock(), parent, tier)
    }

    /// Abort a single session. False if it is not registered.
    pub fn abort_session(&self, session_id: &str) -> bool {
        let handle = self
            .inner
            .lock()
            .get(session_id)
            .map(|r| r.handle.clone());
        match handle {
            Some(h) => h.abort(session_id),
            None => false,
        }
    }

    /// Abort `root` and then every descendant, depth first, each exactly
    /// once. Returns the sessions in the order they were aborted.
    pub fn abort_hierarchy(&self, root: &str) -> Vec<SessionId> {
        let targets: Vec<(SessionId, Arc<dyn AbortHandle>)> = {
            let map = self.inner.lock();
            let mut out = Vec::new();
            let mut seen = HashSet::new();
            let mut stack = vec![root.to_string()];
            while let Some(id) = stack.pop() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                // Children may have unregistered already.
                let Some(reg) = map.get(&id) else { continue };
                out.push((id, reg.handle.clone()));
                stack.extend(reg.children.iter().rev().cloned());
            }
            out
        };

        let mut aborted = Vec::with_capacity(targets.len());
        for (id, handle) in targets {
            handle.abort(&id);
            aborted.push(id);
        }
        info!(root = %root, count = aborted.len(), "hierarchy aborted");
        aborted
    }

    /// Register and get a guard that unregisters on drop.
    pub fn scoped(
        &self,
        session_id: &str,
        handle: Arc<dyn AbortHandle>,
        parent: Option<&str>,
        tier: Tier,
    ) -> RegistrationGuard {
        self.register(session_id, handle, parent, tier);
        self.guard(session_id)
    }

    /// A guard for an existing registration.
    pub fn guard(&self, session_id: &str) -> RegistrationGuard {
        RegistrationGuard {
            registry: self.clone(),
            session_id: session_id.to_string(),
        }
    }
}

fn insert(
    map: &mut HashMap<SessionId, Registration>,
    session_id: &str,
    handle: Arc<dyn AbortHandle>,
    parent: Option<&str>,
    tier: Tier,
) {
    let children = map
        .remove(session_id)
        .map(|old| old.children)
        .unwrap_or_default();
    if let Some(parent) = parent
        && let Some(p) = map.get_mut(parent)
        && !p.children.iter().any(|c| c == session_id)
    {
        p.children.push(session_id.to_string());
    }
    map.insert(
        session_id.to_string(),
        Registration {
            handle,
            parent: parent.map(str::to_string),
            tier,
            children,
        },
    );
}

fn live_children(map: &HashMap<SessionId, Registration>, parent: &str, tier: Tier) -> usize {
    map.get(parent)
        .map(|p| {
            p.children
                .iter()
                .filter(|c| map.get(*c).is_some_and(|r| r.tier == tier))
                .count()
        })
        .unwrap_or(0)
}

/// Unregisters its session when dropped.
pub struct RegistrationGuard {
    registry: RuntimeRegistry,
    session_id: SessionId,
}

impl RegistrationGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id);
    }
}
