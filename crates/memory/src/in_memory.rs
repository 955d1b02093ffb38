//! In-memory history, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use opsdesk_core::error::HistoryError;
use opsdesk_core::history::ChatHistoryStore;
use opsdesk_core::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A history store that keeps every session in a map.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryHistoryStore {
    sessions: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of users with at least one message.
    pub async fn user_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryHistoryStore {
    fn name(&self) -> &str { "in_memory" }

    async fn append_all(&self, user_id: &str, messages: Vec<Message>) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.sessions
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Vec<Message>, HistoryError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
