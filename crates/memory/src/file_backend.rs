//! File-based chat history — one JSON-lines file per user.
//!
//! Each line is a JSON-encoded `Message`. The file for a user is named by
//! the SHA-256 of the user id, so ids never touch the filesystem and two
//! users can never share a file.
//!
//! Storage location: `~/.opsdesk/history/<sha256(user_id)>.jsonl`
//!
//! A user's file is read once, on first access, and cached. Appends write
//! whole lines in append mode and `sync_data()` before returning, then
//! extend the cache. Corrupted or half-written lines (e.g. from a crash
//! mid-write) are skipped with a warning on load.

use async_trait::async_trait;
use opsdesk_core::error::HistoryError;
use opsdesk_core::history::ChatHistoryStore;
use opsdesk_core::message::Message;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Cached view of one user's file.
#[derive(Default)]
struct Session {
    messages: Vec<Message>,
    /// The file ends without a newline; the next write must start one.
    dangling: bool,
}

type Slot = Arc<tokio::sync::Mutex<Option<Session>>>;

/// A file-backed history store using one JSONL file per user.
///
/// Writers for the same user are serialized by that user's slot lock;
/// writers for different users never wait on each other.
pub struct FileHistoryStore {
    dir: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl FileHistoryStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File history store ready");
        Self {
            dir,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `user_id`'s history.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        let digest = Sha256::digest(user_id.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.jsonl"))
    }

    fn slot(&self, user_id: &str) -> Slot {
        // Held only long enough to clone the Arc; never across an await.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(user_id.to_string()).or_default().clone()
    }

    /// Read and parse a user's file. A missing file is an empty history.
    async fn read_session(path: &Path) -> Result<Session, HistoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Session::default()),
            Err(e) => {
                return Err(HistoryError::Storage(format!(
                    "Failed to read history file: {e}"
                )));
            }
        };

        let messages = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupted history line");
                    None
                }
            })
            .collect();

        Ok(Session {
            messages,
            dangling: !content.is_empty() && !content.ends_with('\n'),
        })
    }

    async fn write_lines(&self, path: &Path, payload: &str) -> Result<(), HistoryError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            HistoryError::Storage(format!("Failed to create history directory: {e}"))
        })?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open history file: {e}")))?;

        file.write_all(payload.as_bytes())
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to write history file: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to sync history file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ChatHistoryStore for FileHistoryStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append_all(&self, user_id: &str, messages: Vec<Message>) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut payload = String::new();
        for message in &messages {
            let line = serde_json::to_string(message)
                .map_err(|e| HistoryError::Serialization(e.to_string()))?;
            payload.push_str(&line);
            payload.push('\n');
        }

        let path = self.path_for(user_id);
        let slot = self.slot(user_id);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            *guard = Some(Self::read_session(&path).await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(HistoryError::Storage("history session not loaded".into()));
        };

        if session.dangling {
            payload.insert(0, '\n');
        }
        if let Err(e) = self.write_lines(&path, &payload).await {
            // Part of the payload may be on disk; re-read the file next time.
            *guard = None;
            return Err(e);
        }

        session.dangling = false;
        debug!(count = messages.len(), "Appended messages to history");
        session.messages.extend(messages);
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Vec<Message>, HistoryError> {
        let slot = self.slot(user_id);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            let session = Self::read_session(&self.path_for(user_id)).await?;
            debug!(count = session.messages.len(), "History loaded from disk");
            *guard = Some(session);
        }

        Ok(guard
            .as_ref()
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }
}
