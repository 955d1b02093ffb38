//! Chat message types.
//!
//! Messages are immutable once appended to a user's history. The assistant
//! reply carries metadata describing which tier (or the local responder)
//! produced it and the mode in effect.

use crate::context::Mode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

/// Advisory metadata attached to assistant replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Tier name that answered, or `"local"` for the rule-based responder
    pub tier: String,

    /// Mode in effect after the answer was produced
    pub mode: Mode,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Cap the content at `max_chars` characters.
    pub fn bounded(mut self, max_chars: usize) -> Self {
        self.content = truncate_chars(&self.content, max_chars);
        self
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `…` when cut.
///
/// Always splits on a char boundary. The marker counts toward the limit.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("How many open tickets?");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "How many open tickets?");
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn metadata_survives_json() {
        let msg = Message::assistant("There are 4 open tickets.").with_metadata(MessageMetadata {
            tier: "flash".into(),
            mode: Mode::Full,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.unwrap().tier, "flash");
    }

    #[test]
    fn bounded_content() {
        let msg = Message::user("a".repeat(50)).bounded(10);
        assert_eq!(msg.content.chars().count(), 10);
        assert!(msg.content.ends_with('…'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_chars(text, 4);
        assert_eq!(cut, "hél…");
        assert_eq!(truncate_chars(text, 100), text);
        assert_eq!(truncate_chars(text, 0), "");
    }
}
