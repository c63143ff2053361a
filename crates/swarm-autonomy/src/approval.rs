use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use swarm_config::ApprovalConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Approve or deny.
    YesNo,
    /// The human types an answer.
    FreeText,
}

/// A request for human input, as shown to whoever resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub kind: ApprovalKind,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Auto-deny after this instant.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalAnswer {
    Decision(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

struct Pending {
    request: ApprovalRequest,
    tx: oneshot::Sender<ApprovalAnswer>,
}

struct Inner {
    pending: Mutex<HashMap<Uuid, Pending>>,
    request_tx: mpsc::Sender<ApprovalRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<ApprovalRequest>>>,
    yes_no_timeout: Duration,
    free_text_timeout: Duration,
}

/// Pending human approvals. Each request resolves exactly once: the first
/// `resolve`/`respond` wins, otherwise the timeout does. Cheap to clone.
#[derive(Clone)]
pub struct ApprovalService {
    inner: Arc<Inner>,
}

impl Default for ApprovalService {
    fn default() -> Self {
        Self::new(&ApprovalConfig::default())
    }
}

impl ApprovalService {
    pub fn new(config: &ApprovalConfig) -> Self {
        Self::with_timeouts(
            Duration::from_secs(config.yes_no_timeout_secs),
            Duration::from_secs(config.free_text_timeout_secs),
        )
    }

    pub fn with_timeouts(yes_no: Duration, free_text: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                request_tx: tx,
                request_rx: Mutex::new(Some(rx)),
                yes_no_timeout: yes_no,
                free_text_timeout: free_text,
            }),
        }
    }

    /// Take the receiver of new requests (used by whatever shows them to a
    /// human). Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<ApprovalRequest>> {
        self.inner.request_rx.lock().take()
    }

    /// Requests still waiting for an answer.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut list: Vec<ApprovalRequest> = self
            .inner
            .pending
            .lock()
            .values()
            .map(|p| p.request.clone())
            .collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    /// Ask for a yes/no decision. Resolves `false` on denial or timeout.
    pub async fn request(
        &self,
        kind: ApprovalKind,
        description: &str,
        metadata: serde_json::Value,
    ) -> bool {
        match self.submit(kind, description, metadata).await {
            (ApprovalOutcome::Approved, _) => true,
            _ => false,
        }
    }

    /// Ask for a free-text answer. `None` on timeout.
    pub async fn ask(&self, description: &str, metadata: serde_json::Value) -> Option<String> {
        match self.submit(ApprovalKind::FreeText, description, metadata).await {
            (ApprovalOutcome::Approved, Some(ApprovalAnswer::Text(t))) => Some(t),
            _ => None,
        }
    }

    async fn submit(
        &self,
        kind: ApprovalKind,
        description: &str,
        metadata: serde_json::Value,
    ) -> (ApprovalOutcome, Option<ApprovalAnswer>) {
        let timeout = match kind {
            ApprovalKind::YesNo => self.inner.yes_no_timeout,
            ApprovalKind::FreeText => self.inner.free_text_timeout,
        };
        let now = Utc::now();
        let window = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            kind,
            description: description.to_string(),
            metadata,
            created_at: now,
            expires_at: now + window,
        };
        let id = request.id;

        info!(request_id = %id, ?kind, "requesting human approval");

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            id,
            Pending {
                request: request.clone(),
                tx,
            },
        );

        match self.inner.request_tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // No one can ever see it: deny now.
                self.inner.pending.lock().remove(&id);
                warn!(request_id = %id, "approval channel closed, denying");
                return (ApprovalOutcome::Denied, None);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(request_id = %id, "approval channel full, request only visible via pending()");
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ApprovalAnswer::Decision(true))) => (ApprovalOutcome::Approved, None),
            Ok(Ok(ApprovalAnswer::Decision(false))) => (ApprovalOutcome::Denied, None),
            Ok(Ok(answer @ ApprovalAnswer::Text(_))) => (ApprovalOutcome::Approved, Some(answer)),
            Ok(Err(_)) => (ApprovalOutcome::Denied, None),
            Err(_) => {
                // Whoever resolves later finds nothing.
                self.inner.pending.lock().remove(&id);
                info!(request_id = %id, "approval request timed out");
                (ApprovalOutcome::TimedOut, None)
            }
        }
    }

    /// Resolve a yes/no request. Returns `false` if it was already resolved,
    /// timed out, or never existed.
    pub fn resolve(&self, id: Uuid, approved: bool) -> bool {
        self.deliver(id, ApprovalAnswer::Decision(approved))
    }

    /// Answer a free-text request.
    pub fn respond(&self, id: Uuid, text: impl Into<String>) -> bool {
        self.deliver(id, ApprovalAnswer::Text(text.into()))
    }

    fn deliver(&self, id: Uuid, answer: ApprovalAnswer) -> bool {
        let Some(pending) = self.inner.pending.lock().remove(&id) else {
            debug!(request_id = %id, "approval already resolved or unknown");
            return false;
        };
        // A free-text request answered with a bare decision: treat `false` as
        // a refusal and `true` as an empty answer.
        let answer = match (pending.request.kind, answer) {
            (ApprovalKind::FreeText, ApprovalAnswer::Decision(true)) => {
                ApprovalAnswer::Text(String::new())
            }
            // A yes/no request answered with text approves only on an
            // explicit yes.
            (ApprovalKind::YesNo, ApprovalAnswer::Text(text)) => {
                ApprovalAnswer::Decision(is_affirmative(&text))
            }
            (_, a) => a,
        };
        pending.tx.send(answer).is_ok()
    }
}

fn is_affirmative(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "y" | "yes" | "approve" | "approved"
    )
}
