//! Persisted session configs, stats, and cross-task history.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use invisibrow_types::{InvisibrowError, Session, SessionStats};

use crate::atomic_write;

/// Process-global store of sessions, persisted as a JSON array.
///
/// Every mutation stamps the session's `updated_at` and rewrites the file.
/// Sessions are created and deleted by the user only.
pub struct SessionStore {
    path: PathBuf,
    sessions: Mutex<Vec<Session>>,
}

impl SessionStore {
    /// Load sessions from `path`, or start empty if the file is absent.
    pub fn load(path: PathBuf) -> Result<Self, InvisibrowError> {
        let sessions = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                InvisibrowError::Store(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                InvisibrowError::Store(format!("invalid session file {}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            sessions: Mutex::new(sessions),
        })
    }

    /// Create and persist a new session.
    pub fn create(&self, name: &str, headless: bool) -> Result<Session, InvisibrowError> {
        let session = Session::new(name, headless);
        let mut sessions = self.lock()?;
        sessions.push(session.clone());
        self.persist(&sessions)?;
        info!(session_id = %session.id, name = %session.name, "session created");
        Ok(session)
    }

    /// All sessions, in creation order.
    pub fn list(&self) -> Result<Vec<Session>, InvisibrowError> {
        Ok(self.lock()?.clone())
    }

    /// Fetch one session by id.
    pub fn get(&self, id: &str) -> Result<Option<Session>, InvisibrowError> {
        Ok(self.lock()?.iter().find(|s| s.id == id).cloned())
    }

    /// Rename a session. Returns `false` if the id is unknown.
    pub fn rename(&self, id: &str, name: &str) -> Result<bool, InvisibrowError> {
        self.mutate(id, |session| {
            session.name = name.to_string();
        })
    }

    /// Delete a session. Returns `false` if the id is unknown. The caller is
    /// responsible for removing the browser profile directory.
    pub fn delete(&self, id: &str) -> Result<bool, InvisibrowError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.persist(&sessions)?;
        info!(session_id = %id, "session deleted");
        Ok(true)
    }

    /// Flip the session's preferred headless flag, returning the new value.
    pub fn toggle_headless(&self, id: &str) -> Result<Option<bool>, InvisibrowError> {
        let mut result = None;
        self.mutate(id, |session| {
            session.headless = !session.headless;
            result = Some(session.headless);
        })?;
        Ok(result)
    }

    /// Append a plain-text summary of a successful task to the session's
    /// history.
    pub fn append_history(&self, id: &str, entry: &str) -> Result<bool, InvisibrowError> {
        self.mutate(id, |session| {
            session.session_history.push(entry.to_string());
        })
    }

    /// The session's history entries, oldest first.
    pub fn session_history(&self, id: &str) -> Result<Vec<String>, InvisibrowError> {
        Ok(self
            .lock()?
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.session_history.clone())
            .unwrap_or_default())
    }

    /// Fold one LLM call's accounting into the session's rolling stats.
    pub fn apply_usage(
        &self,
        id: &str,
        prompt_tokens: u64,
        cached_tokens: u64,
        completion_tokens: u64,
        cost: f64,
    ) -> Result<Option<SessionStats>, InvisibrowError> {
        let mut updated = None;
        self.mutate(id, |session| {
            session.stats.tokens += prompt_tokens + completion_tokens;
            session.stats.cached_tokens += cached_tokens;
            session.stats.cost += cost;
            session.stats.last_prompt_tokens = prompt_tokens;
            updated = Some(session.stats);
        })?;
        Ok(updated)
    }

    /// Mark whether a human is currently solving an intervention for this
    /// session. Transient: not persisted.
    pub fn set_verifying(&self, id: &str, verifying: bool) -> Result<(), InvisibrowError> {
        let mut sessions = self.lock()?;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == id) {
            session.is_verifying = verifying;
        }
        Ok(())
    }

    fn mutate<F>(&self, id: &str, apply: F) -> Result<bool, InvisibrowError>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.lock()?;
        let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        apply(session);
        session.touch();
        self.persist(&sessions)?;
        Ok(true)
    }

    fn persist(&self, sessions: &[Session]) -> Result<(), InvisibrowError> {
        let json = serde_json::to_string_pretty(sessions)
            .map_err(|e| InvisibrowError::Store(format!("failed to serialize sessions: {e}")))?;
        atomic_write(&self.path, &json)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Session>>, InvisibrowError> {
        self.sessions
            .lock()
            .map_err(|e| InvisibrowError::Store(format!("session lock poisoned: {e}")))
    }
}
