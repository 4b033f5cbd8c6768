//! In-memory conversation history for one chat session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking questions.
    User,
    /// The model answering them.
    Assistant,
}

impl Role {
    /// Prefix used when the turn is rendered into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who sent the message.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ConversationTurn {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Message counts shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    /// Messages of both roles.
    pub total_messages: usize,
    /// Questions asked.
    pub user_messages: usize,
}

/// Append-only, chronologically ordered message list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// An empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Remove every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Turns in chronological order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn has been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Total and user message counts.
    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            total_messages: self.turns.len(),
            user_messages: self.turns.iter().filter(|t| t.role == Role::User).count(),
        }
    }

    /// Render as `Role: content` lines, one per turn.
    pub fn render(&self) -> String {
        self.turns.iter().map(|t| format!("{}: {}\n", t.role, t.content)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_role_prefixed_lines_in_order() {
        let mut conversation = Conversation::new();
        conversation.push(ConversationTurn::user("Hi"));
        conversation.push(ConversationTurn::assistant("Hello!"));
        assert_eq!(conversation.render(), "User: Hi\nAssistant: Hello!\n");
    }

    #[test]
    fn stats_count_questions_separately() {
        let mut conversation = Conversation::new();
        conversation.push(ConversationTurn::user("a"));
        conversation.push(ConversationTurn::assistant("b"));
        conversation.push(ConversationTurn::user("c"));
        assert_eq!(conversation.stats(), ConversationStats { total_messages: 3, user_messages: 2 });

        conversation.clear();
        assert!(conversation.is_empty());
        assert_eq!(conversation.stats(), ConversationStats::default());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ConversationTurn::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }
}
