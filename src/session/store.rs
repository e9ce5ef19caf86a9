//! Durable session storage.
//!
//! [`FileSessionStore`] keeps each session as pretty-printed JSON at
//! `{chats_dir}/chat_{flattened id}.json`:
//!
//! ```json
//! { "session_id": "...", "messages": [ { "role": "user", "content": "..." } ] }
//! ```
//!
//! Writes are atomic: each save goes to its own temp file, is fsynced, then
//! renamed over the target, so overlapping saves of one session end with one
//! complete document. Reads are best effort: entries with an unknown role or
//! without text content are skipped.
//!
//! File names drop dashes, so distinct ids can share a file. A load whose
//! stored `session_id` names another session is rejected rather than served.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::ChatTurn;
use super::validation::session_file_name;
use crate::error::{AssistantError, Result};
use crate::llm::message::Role;

/// Load/save contract for persisted sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. `Ok(None)` means nothing is stored under `id`.
    async fn load(&self, id: &str) -> Result<Option<Vec<ChatTurn>>>;

    /// Persist the full turn list for `id`, replacing what was stored.
    async fn save(&self, id: &str, turns: &[ChatTurn]) -> Result<()>;
}

#[derive(Serialize)]
struct SessionFile<'a> {
    session_id: &'a str,
    messages: &'a [ChatTurn],
}

/// Parse a stored session document, skipping malformed entries.
pub fn parse_session_json(text: &str) -> Result<Vec<ChatTurn>> {
    let value = parse_document(text)?;
    Ok(session_turns(&value))
}

fn parse_document(text: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text)
        .map_err(|e| AssistantError::Session(format!("malformed session file: {e}")))
}

fn session_turns(value: &serde_json::Value) -> Vec<ChatTurn> {
    let Some(messages) = value.get("messages").and_then(|m| m.as_array()) else {
        return Vec::new();
    };

    messages
        .iter()
        .filter_map(|entry| {
            let role = entry.get("role").and_then(|r| r.as_str()).and_then(Role::parse)?;
            if role == Role::System {
                return None;
            }
            let content = entry.get("content").and_then(|c| c.as_str())?;
            Some(ChatTurn {
                role,
                content: content.to_owned(),
            })
        })
        .collect()
}

/// JSON-file session store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AssistantError::Session(format!(
                "failed to create chats directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(session_file_name(id))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<ChatTurn>>> {
        let path = self.path_for(id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AssistantError::Session(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        let value = parse_document(&text)?;
        let owner = value.get("session_id").and_then(|v| v.as_str());
        if let Some(owner) = owner.filter(|owner| *owner != id) {
            return Err(AssistantError::InvalidSession(format!(
                "session id {id:?} maps to the file of session {owner:?}"
            )));
        }
        Ok(Some(session_turns(&value)))
    }

    async fn save(&self, id: &str, turns: &[ChatTurn]) -> Result<()> {
        let path = self.path_for(id);
        let json = serde_json::to_string_pretty(&SessionFile {
            session_id: id,
            messages: turns,
        })
        .map_err(|e| AssistantError::Session(format!("failed to serialize session: {e}")))?;

        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", session_file_name(id), uuid::Uuid::new_v4()));
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AssistantError::Session(format!(
                "failed to write {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}
