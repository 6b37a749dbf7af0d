//! Per-session conversation context.
//!
//! Holds the ordered message history with a hard storage cap, and
//! assembles the prompt for each model call: system instruction first,
//! then recalled memories as synthetic system-channel messages, then
//! the most recent window of conversation — never splitting a tool
//! reply from the assistant message that requested it.

use agentd_core::memory::{MemoryQuery, MemoryStore};
use agentd_core::message::{Message, Role};
use agentd_core::session::AgentSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SessionContext {
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    max_messages: usize,
    max_context_messages: usize,
    memory_enabled: bool,
    memory_context_size: usize,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl SessionContext {
    pub fn new(settings: &AgentSettings, memory: Option<Arc<dyn MemoryStore>>) -> Self {
        let now = Utc::now();
        let mut messages = Vec::new();
        if !settings.system_instruction.is_empty() {
            messages.push(Message::system(&settings.system_instruction));
        }
        Self {
            messages,
            created_at: now,
            updated_at: now,
            max_messages: settings.max_messages.max(1),
            max_context_messages: settings.max_context_messages.max(1),
            memory_enabled: settings.memory_enabled,
            memory_context_size: settings.memory_context_size,
            memory,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, enforcing the storage cap by dropping the
    /// oldest non-system message. The system instruction is never
    /// dropped.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();

        while self.messages.len() > self.max_messages {
            let drop_index = self
                .messages
                .iter()
                .position(|m| m.role != Role::System);
            match drop_index {
                Some(index) => {
                    self.messages.remove(index);
                }
                None => break, // nothing but the system message left
            }
        }
    }

    /// Ordered copy of the full history.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Reset the history, optionally keeping the system instruction.
    pub fn clear_history(&mut self, keep_system: bool) {
        if keep_system {
            self.messages.retain(|m| m.role == Role::System);
        } else {
            self.messages.clear();
        }
        self.updated_at = Utc::now();
    }

    /// Assemble the prompt for a model call.
    ///
    /// Layout: system instruction, then up to `memory_context_size`
    /// recalled memories as synthetic system messages (not persisted),
    /// then the last `max_context_messages` non-system messages with
    /// assistant/tool pairs kept contiguous.
    pub async fn assemble_prompt(&mut self) -> Vec<Message> {
        let mut prompt: Vec<Message> = Vec::new();

        if let Some(system) = self.messages.first().filter(|m| m.role == Role::System) {
            prompt.push(system.clone());
        }

        prompt.extend(self.recall_memories().await);

        let non_system: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let mut start = non_system.len().saturating_sub(self.max_context_messages);
        // Never open the window on a tool reply: walk back to the
        // assistant message that issued the calls.
        while start > 0 && non_system[start].role == Role::Tool {
            start -= 1;
        }

        prompt.extend(non_system[start..].iter().map(|m| (*m).clone()));
        prompt
    }

    /// Top-ranked memories relevant to the latest user message, as
    /// synthetic system-channel messages.
    async fn recall_memories(&self) -> Vec<Message> {
        if !self.memory_enabled || self.memory_context_size == 0 {
            return Vec::new();
        }
        let Some(store) = &self.memory else {
            return Vec::new();
        };
        let Some(query_text) = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
        else {
            return Vec::new();
        };

        let query = MemoryQuery::new(query_text).with_limit(self.memory_context_size);
        match store.search(query).await {
            Ok(hits) => {
                if !hits.is_empty() {
                    debug!(count = hits.len(), "recalled memories for prompt");
                }
                hits.into_iter()
                    .map(|hit| Message::system(format!("Relevant memory: {}", hit.record.content)))
                    .collect()
            }
            Err(e) => {
                warn!("memory recall failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentd_core::memory::{MemoryKind, MemoryRecord};
    use agentd_core::message::MessageToolCall;
    use agentd_memory::InMemoryStore;

    fn settings(max_messages: usize, max_context: usize) -> AgentSettings {
        AgentSettings {
            system_instruction: "be helpful".into(),
            max_iterations: 10,
            max_context_messages: max_context,
            max_messages,
            memory_enabled: false,
            memory_context_size: 0,
        }
    }

    #[test]
    fn system_message_is_first_and_unique() {
        let ctx = SessionContext::new(&settings(10, 10), None);
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, Role::System);
    }

    #[test]
    fn cap_drops_oldest_non_system() {
        // Cap of 3: system + two others.
        let mut ctx = SessionContext::new(&settings(3, 10), None);
        ctx.append(Message::user("first"));
        ctx.append(Message::assistant("reply"));
        ctx.append(Message::user("second"));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].role, Role::System);
        assert_eq!(snapshot[1].content, "reply");
        assert_eq!(snapshot[2].content, "second");
    }

    #[test]
    fn append_at_cap_drops_exactly_one() {
        let mut ctx = SessionContext::new(&settings(3, 10), None);
        ctx.append(Message::user("a"));
        ctx.append(Message::user("b"));
        assert_eq!(ctx.len(), 3);
        ctx.append(Message::user("c"));
        assert_eq!(ctx.len(), 3);
        let snapshot = ctx.snapshot();
        let contents: Vec<&str> = snapshot.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn clear_history_keeps_system() {
        let mut ctx = SessionContext::new(&settings(10, 10), None);
        ctx.append(Message::user("hi"));
        ctx.clear_history(true);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.snapshot()[0].role, Role::System);

        ctx.append(Message::user("hi again"));
        ctx.clear_history(false);
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn prompt_window_limits_messages() {
        let mut ctx = SessionContext::new(&settings(100, 2), None);
        for i in 0..5 {
            ctx.append(Message::user(format!("msg {i}")));
        }
        let prompt = ctx.assemble_prompt().await;
        // system + last 2
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[1].content, "msg 3");
        assert_eq!(prompt[2].content, "msg 4");
    }

    #[tokio::test]
    async fn prompt_window_never_splits_tool_pairs() {
        let mut ctx = SessionContext::new(&settings(100, 2), None);
        ctx.append(Message::user("question"));
        ctx.append(Message::assistant_with_calls(
            "calling",
            vec![
                MessageToolCall {
                    id: "c1".into(),
                    name: "calc__add".into(),
                    arguments: "{}".into(),
                },
                MessageToolCall {
                    id: "c2".into(),
                    name: "calc__mul".into(),
                    arguments: "{}".into(),
                },
            ],
        ));
        ctx.append(Message::tool_result("c1", "calc__add", "3", false));
        ctx.append(Message::tool_result("c2", "calc__mul", "2", false));

        let prompt = ctx.assemble_prompt().await;
        // A window of 2 would open on the second tool reply; it must be
        // widened back to the assistant message carrying the calls.
        let roles: Vec<Role> = prompt.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::Assistant, Role::Tool, Role::Tool]
        );
    }

    #[tokio::test]
    async fn memories_injected_as_synthetic_system_messages() {
        let store = Arc::new(InMemoryStore::new());
        store
            .store(MemoryRecord::new(
                MemoryKind::LongTerm,
                "the user's favorite color is blue",
                0.9,
            ))
            .await
            .unwrap();

        let mut s = settings(100, 10);
        s.memory_enabled = true;
        s.memory_context_size = 3;
        let mut ctx = SessionContext::new(&s, Some(store));
        ctx.append(Message::user("what's my favorite color?"));

        let prompt = ctx.assemble_prompt().await;
        assert_eq!(prompt[0].content, "be helpful");
        assert!(prompt[1].content.contains("favorite color is blue"));
        assert_eq!(prompt[1].role, Role::System);

        // Synthetic messages are not persisted in the history.
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn memory_disabled_skips_recall() {
        let store = Arc::new(InMemoryStore::new());
        store
            .store(MemoryRecord::new(MemoryKind::LongTerm, "blue", 0.9))
            .await
            .unwrap();

        let mut ctx = SessionContext::new(&settings(100, 10), Some(store));
        ctx.append(Message::user("blue?"));
        let prompt = ctx.assemble_prompt().await;
        assert_eq!(prompt.len(), 2); // system + user only
    }
}
