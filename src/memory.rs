//! Rolling per-channel conversation memory backed by the messages table.

use crate::db::Database;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub token_estimate: usize,
}

/// Rough token count: four characters per token, never zero.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

#[derive(Clone)]
pub struct MemoryService {
    db: Database,
    message_limit: usize,
}

impl MemoryService {
    pub fn new(db: Database, message_limit: usize) -> Self {
        Self { db, message_limit }
    }

    /// Record a user message. `content` carries the author label so the
    /// context assembler can show who said what.
    pub fn add_user_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        content: &str,
    ) -> anyhow::Result<()> {
        self.db.append_message(
            guild_id,
            channel_id,
            Some(user_id),
            Role::User.as_str(),
            content,
            estimate_tokens(content),
        )
    }

    pub fn add_assistant_message(
        &self,
        guild_id: u64,
        channel_id: u64,
        content: &str,
    ) -> anyhow::Result<()> {
        self.db.append_message(
            guild_id,
            channel_id,
            None,
            Role::Assistant.as_str(),
            content,
            estimate_tokens(content),
        )
    }

    /// The most recent window of messages for a channel, oldest first.
    /// Rows with unknown roles are skipped.
    pub fn recent_window(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<Vec<ConversationMessage>> {
        let rows = self.db.recent_messages(guild_id, channel_id, self.message_limit)?;
        let mut messages: Vec<ConversationMessage> = rows
            .into_iter()
            .filter_map(|(role, content, token_estimate)| {
                Role::parse(&role).map(|role| ConversationMessage {
                    role,
                    content,
                    token_estimate,
                })
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    pub fn clear_channel(&self, guild_id: u64, channel_id: u64) -> anyhow::Result<usize> {
        let count = self.db.clear_channel(guild_id, channel_id)?;
        debug!("Cleared {} messages from channel {}", count, channel_id);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_config;

    fn test_memory(limit: usize) -> MemoryService {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();
        MemoryService::new(db, limit)
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("hey"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_window_is_chronological_and_capped() {
        let memory = test_memory(3);

        for i in 1..=5 {
            memory.add_user_message(1, 10, 7, &format!("alice: msg {}", i)).unwrap();
        }
        memory.add_assistant_message(1, 10, "reply").unwrap();

        let window = memory.recent_window(1, 10).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "alice: msg 4");
        assert_eq!(window[1].content, "alice: msg 5");
        assert_eq!(window[2].role, Role::Assistant);
        assert_eq!(window[2].content, "reply");
    }

    #[test]
    fn test_clear_channel_scope() {
        let memory = test_memory(50);

        memory.add_user_message(1, 10, 7, "here").unwrap();
        memory.add_user_message(1, 11, 7, "elsewhere").unwrap();

        assert_eq!(memory.clear_channel(1, 10).unwrap(), 1);
        assert!(memory.recent_window(1, 10).unwrap().is_empty());
        assert_eq!(memory.recent_window(1, 11).unwrap().len(), 1);
    }
}
