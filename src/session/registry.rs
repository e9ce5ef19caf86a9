//! In-memory registry of resident sessions.
//!
//! The registry maps session ids to their turn lists. Each turn list sits
//! behind its own mutex, so requests for different sessions never contend.
//! Two requests on the same session interleave at turn granularity and the
//! last save wins on disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use super::store::SessionStore;
use super::validation::validate_session_id;
use super::ChatTurn;
use crate::error::Result;

/// Shared, lockable turn list of one session.
pub type SessionHandle = Arc<Mutex<Vec<ChatTurn>>>;

/// Resident sessions plus the store they are loaded from and saved to.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a session id, creating the session when needed.
    ///
    /// No id (or an empty one) starts a new session under a fresh UUID.
    /// Otherwise the id is validated, then looked up in memory, then on
    /// disk; a miss in both starts an empty session under that id.
    pub async fn get_or_create(&self, id: Option<&str>) -> Result<(String, SessionHandle)> {
        let started = Instant::now();

        let Some(id) = id.filter(|s| !s.is_empty()) else {
            let id = uuid::Uuid::new_v4().to_string();
            let handle = SessionHandle::default();
            self.sessions.write().await.insert(id.clone(), Arc::clone(&handle));
            tracing::info!(
                source = "new",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "session_get_or_create"
            );
            return Ok((id, handle));
        };

        validate_session_id(id)?;

        if let Some(handle) = self.sessions.read().await.get(id) {
            tracing::info!(
                source = "memory",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "session_get_or_create"
            );
            return Ok((id.to_owned(), Arc::clone(handle)));
        }

        let (turns, source) = match self.store.load(id).await {
            Ok(Some(turns)) => (turns, "disk"),
            Ok(None) => (Vec::new(), "new_id"),
            Err(e) if e.is_client_error() => return Err(e),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "failed to load session, starting fresh");
                (Vec::new(), "new_id")
            }
        };

        let mut sessions = self.sessions.write().await;
        // Another request may have loaded the same id while we read the disk.
        let handle = sessions
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(turns)));
        tracing::info!(
            source,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session_get_or_create"
        );
        Ok((id.to_owned(), Arc::clone(handle)))
    }

    /// Resident handle for `id`, if loaded.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Ordered turns of a session: resident copy first, then the store.
    ///
    /// Unknown sessions yield an empty list. Looking up history never makes
    /// a session resident.
    pub async fn history(&self, id: &str) -> Result<Vec<ChatTurn>> {
        validate_session_id(id)?;
        if let Some(handle) = self.get(id).await {
            return Ok(handle.lock().await.clone());
        }
        match self.store.load(id).await {
            Ok(turns) => Ok(turns.unwrap_or_default()),
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "failed to load session history");
                Ok(Vec::new())
            }
        }
    }

    /// Persist one session. Failures are logged, never returned.
    pub async fn save(&self, id: &str) {
        let Some(handle) = self.get(id).await else {
            return;
        };
        let turns = handle.lock().await.clone();
        self.save_turns(id, &turns, true).await;
    }

    /// Persist a snapshot of turns without timing output.
    pub async fn save_quiet(&self, id: &str, turns: &[ChatTurn]) {
        self.save_turns(id, turns, false).await;
    }

    async fn save_turns(&self, id: &str, turns: &[ChatTurn], log_timing: bool) {
        if turns.is_empty() {
            return;
        }
        let started = Instant::now();
        match self.store.save(id, turns).await {
            Ok(()) if log_timing => tracing::info!(
                session = %id,
                turns = turns.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "save_session"
            ),
            Ok(()) => {}
            Err(e) => tracing::error!(session = %id, error = %e, "failed to save session"),
        }
    }

    /// Persist every resident session.
    pub async fn save_all(&self) {
        let resident: Vec<(String, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect();
        let count = resident.len();
        for (id, handle) in resident {
            let turns = handle.lock().await.clone();
            self.save_turns(&id, &turns, false).await;
        }
        tracing::info!(sessions = count, "saved all sessions");
    }

    /// Number of resident sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
