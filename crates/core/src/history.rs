//! Chat history trait — durable, per-user, append-only conversation logs.
//!
//! One store instance serves every user, partitioned by user id. Appends
//! are durable before they return and never interleave partially with
//! other appends for the same user.

use crate::error::HistoryError;
use crate::message::Message;
use async_trait::async_trait;

/// The core ChatHistoryStore trait.
///
/// Implementations: JSONL files on disk, in-memory (for testing).
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// The backend name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Append one message to `user_id`'s history.
    async fn append(&self, user_id: &str, message: Message) -> std::result::Result<(), HistoryError> {
        self.append_all(user_id, vec![message]).await
    }

    /// Append several messages as one atomic group.
    async fn append_all(
        &self,
        user_id: &str,
        messages: Vec<Message>,
    ) -> std::result::Result<(), HistoryError>;

    /// Every message ever appended for `user_id`, in append order.
    async fn load(&self, user_id: &str) -> std::result::Result<Vec<Message>, HistoryError>;
}
