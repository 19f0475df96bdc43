//! Conversation history for the chat session.
//!
//! Append-only while a session runs; reset on logout or explicit clear.
//! Serialized as the `chatHistory` value of the local store.

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Ordered conversation turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<ChatTurn>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the system turn unless one is already present.
    ///
    /// Returns true if a turn was added.
    pub fn seed_system(&mut self, prompt: &str) -> bool {
        if self.has_system() {
            return false;
        }
        self.turns.insert(
            0,
            ChatTurn {
                role: ChatRole::System,
                content: prompt.to_owned(),
            },
        );
        true
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatRole::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatRole::Assistant, content.into());
    }

    /// Drop user and assistant turns, keeping the system turn.
    pub fn clear_conversation(&mut self) {
        self.turns.retain(|t| t.role == ChatRole::System);
    }

    /// Drop everything, including the system turn.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn has_system(&self) -> bool {
        self.turns.iter().any(|t| t.role == ChatRole::System)
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Turns authored by `role`, oldest first.
    pub fn by_role(&self, role: ChatRole) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter().filter(move |t| t.role == role)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn push(&mut self, role: ChatRole, content: String) {
        self.turns.push(ChatTurn { role, content });
    }
}
