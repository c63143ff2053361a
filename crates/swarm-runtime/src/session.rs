use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as TokioMutex, RwLock};

use swarm_core::SessionId;

use crate::context::ContextManager;

/// One conversation: its context plus bookkeeping. Created on the first
/// `run()` for a session id and kept for the life of the runtime.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub context: ContextManager,
    /// Completed or in-progress `run()` calls.
    pub runs: u32,
    /// Model calls made across all runs.
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, soft_token_limit: usize) -> Self {
        Self {
            id: id.into(),
            context: ContextManager::new(String::new(), soft_token_limit),
            runs: 0,
            iterations: 0,
            created_at: Utc::now(),
            last_run_at: None,
        }
    }
}

pub type SharedSession = Arc<TokioMutex<Session>>;

/// Sessions owned by one runtime. Holding a session's mutex is the run
/// lock: two runs on the same session never interleave.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, SharedSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session, creating it on first use.
    pub async fn get_or_create(&self, id: &str, soft_token_limit: usize) -> SharedSession {
        // Fast path: session already exists
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                return Arc::clone(session);
            }
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(Session::new(id, soft_token_limit)))),
        )
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }
}
