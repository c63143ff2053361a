use swarm_core::{Message, Role};
use tracing::debug;

/// Prefix of the system message that replaces a compacted history prefix.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

/// Conversation state for one session: the system prompt plus an
/// append-only message log that compaction may shorten from the front.
#[derive(Debug, Clone)]
pub struct ContextManager {
    system_prompt: String,
    messages: Vec<Message>,
    soft_token_limit: usize,
    compactions: u32,
}

impl ContextManager {
    pub fn new(system_prompt: impl Into<String>, soft_token_limit: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            soft_token_limit,
            compactions: 0,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn soft_token_limit(&self) -> usize {
        self.soft_token_limit
    }

    pub fn set_soft_token_limit(&mut self, limit: usize) {
        self.soft_token_limit = limit;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// How many times history has been compacted.
    pub fn compactions(&self) -> u32 {
        self.compactions
    }

    /// What the model sees: the system prompt followed by the history.
    pub fn full_conversation(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            out.push(Message::system(self.system_prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Rough token count of everything sent to the model, at 4 characters
    /// per token.
    pub fn estimate_token_count(&self) -> usize {
        let chars: usize = Role::System.as_str().len()
            + self.system_prompt.len()
            + self
                .messages
                .iter()
                .map(Message::serialized_len)
                .sum::<usize>();
        chars.div_ceil(4)
    }

    /// True once the estimate exceeds the soft limit (or `limit_override`).
    pub fn needs_compaction(&self, limit_override: Option<usize>) -> bool {
        let limit = limit_override.unwrap_or(self.soft_token_limit);
        self.estimate_token_count() > limit
    }

    /// Replace messages `[0, cut)` with one system summary message. Messages
    /// from `cut` on are kept in order. Returns false when there is nothing
    /// to replace.
    pub fn apply_compaction(&mut self, summary: &str, cut: usize) -> bool {
        let cut = cut.min(self.messages.len());
        if cut == 0 {
            return false;
        }
        let before = self.estimate_token_count();
        let summary_msg = Message::system(format!("{SUMMARY_PREFIX}\n{}", summary.trim()));
        self.messages.splice(0..cut, std::iter::once(summary_msg));
        self.compactions += 1;
        debug!(
            replaced = cut,
            tokens_before = before,
            tokens_after = self.estimate_token_count(),
            "history compacted"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_conversation_leads_with_system_prompt() {
        let mut ctx = ContextManager::new("be brief", 1000);
        ctx.push(Message::user("hi"));
        let conv = ctx.full_conversation();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0].role, Role::System);
        assert_eq!(conv[0].content, "be brief");
        assert_eq!(conv[1].content, "hi");
    }

    #[test]
    fn test_apply_compaction_zero_cut_is_noop() {
        let mut ctx = ContextManager::new("", 1000);
        ctx.push(Message::user("hi"));
        assert!(!ctx.apply_compaction("nothing", 0));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.compactions(), 0);
    }
}
