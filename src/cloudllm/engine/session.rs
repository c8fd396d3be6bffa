//! Conversation and Memories (§3).

use crate::client_wrapper::{Message, Role};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Minimum length a `memory.remove` search string must have to be honored (§4.4, §8).
pub const MIN_REMOVE_PREFIX_LEN: usize = 4;

/// Label-keyed, deduplicated set of free-text snippets hoisted across compactions and subtasks.
#[derive(Debug, Clone, Default)]
pub struct Memories {
    by_label: BTreeMap<String, Vec<String>>,
}

impl Memories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: ignores blank text, deduplicates by exact equality.
    pub fn add(&mut self, label: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let entries = self.by_label.entry(label.to_string()).or_default();
        if !entries.iter().any(|e| e == text) {
            entries.push(text.to_string());
        }
    }

    /// Remove entries under `label` whose text starts with `prefix`. Rejects prefixes shorter
    /// than [`MIN_REMOVE_PREFIX_LEN`] without mutating anything, returning `false`.
    pub fn remove(&mut self, label: &str, prefix: &str) -> bool {
        if prefix.len() < MIN_REMOVE_PREFIX_LEN {
            return false;
        }
        let Some(entries) = self.by_label.get_mut(label) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !e.starts_with(prefix));
        if entries.is_empty() {
            self.by_label.remove(label);
        }
        before
            != self
                .by_label
                .get(label)
                .map(|e| e.len())
                .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Render the Memories section appended to the system prompt each turn. Contains the
    /// `"None yet"` sentinel when empty (§8 invariant).
    pub fn format(&self) -> String {
        if self.by_label.is_empty() {
            return "Memories: None yet.".to_string();
        }
        let mut out = String::from("Memories:\n");
        for (label, entries) in &self.by_label {
            out.push_str(&format!("{}:\n", label));
            for entry in entries {
                out.push_str(&format!("- {}\n", entry));
            }
        }
        out
    }
}

/// A single logical LLM dialogue (§3).
///
/// `history` never includes the system message — it is synthesized fresh on every turn by
/// [`Conversation::request_messages`] so that the Memories section reflects the latest state.
pub struct Conversation {
    pub id: String,
    system_prompt_base: String,
    initial_user_message: Message,
    history: Vec<Message>,
    finalized: bool,
}

impl Conversation {
    pub fn new(id: impl Into<String>, system_prompt_base: impl Into<String>, initial_user_content: impl Into<Arc<str>>) -> Self {
        let initial_user_message = Message {
            role: Role::User,
            content: initial_user_content.into(),
            tool_calls: vec![],
        };
        Self {
            id: id.into(),
            system_prompt_base: system_prompt_base.into(),
            initial_user_message: initial_user_message.clone(),
            history: vec![initial_user_message],
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn replace_history(&mut self, new_history: Vec<Message>) {
        self.history = new_history;
    }

    /// A clear-conversation request truncates history back to {system, initial user prompt},
    /// preserving Memories (which live outside the Conversation) (§4.3.2).
    pub fn clear(&mut self) {
        self.history = vec![self.initial_user_message.clone()];
    }

    /// Build the full request: [system(base + memories), ...history].
    pub fn request_messages(&self, memories: &Memories) -> Vec<Message> {
        let system_content = format!("{}\n\n{}", self.system_prompt_base, memories.format());
        let mut out = Vec::with_capacity(self.history.len() + 1);
        out.push(Message {
            role: Role::System,
            content: Arc::from(system_content.as_str()),
            tool_calls: vec![],
        });
        out.extend(self.history.iter().cloned());
        out
    }

    /// Total byte size of the would-be request, used for the compaction threshold check
    /// (§4.3 step 11).
    pub fn projected_byte_size(&self, memories: &Memories) -> usize {
        self.request_messages(memories)
            .iter()
            .map(|m| m.content.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memories_add_is_idempotent() {
        let mut m = Memories::new();
        m.add("INVARIANT", "README uses UTF-8");
        m.add("INVARIANT", "README uses UTF-8");
        assert_eq!(m.format().matches("README uses UTF-8").count(), 1);
    }

    #[test]
    fn empty_memories_format_has_sentinel() {
        let m = Memories::new();
        assert!(m.format().contains("None yet"));
    }

    #[test]
    fn blank_memory_text_is_ignored() {
        let mut m = Memories::new();
        m.add("NOTE", "   ");
        assert!(m.is_empty());
    }

    #[test]
    fn remove_rejects_short_prefix() {
        let mut m = Memories::new();
        m.add("NOTE", "hello world");
        assert!(!m.remove("NOTE", "he"));
        assert!(m.format().contains("hello world"));
    }

    #[test]
    fn remove_matches_by_prefix() {
        let mut m = Memories::new();
        m.add("NOTE", "hello world");
        assert!(m.remove("NOTE", "hello"));
        assert!(!m.format().contains("hello world"));
    }

    #[test]
    fn conversation_first_message_is_system() {
        let conv = Conversation::new("plan", "You are a planner.", "Ticket: T1");
        let msgs = conv.request_messages(&Memories::new());
        assert!(matches!(msgs[0].role, Role::System));
        assert!(matches!(msgs[1].role, Role::User));
    }

    #[test]
    fn clear_preserves_initial_user_message_only() {
        let mut conv = Conversation::new("plan", "sys", "seed");
        conv.push(Message {
            role: Role::Assistant,
            content: Arc::from("hi"),
            tool_calls: vec![],
        });
        conv.clear();
        assert_eq!(conv.history().len(), 1);
        assert_eq!(conv.history()[0].content.as_ref(), "seed");
    }
}
