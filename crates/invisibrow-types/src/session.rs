//! Session records: browser identity, rolling stats, and cross-task history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rolling per-session counters, mutated only by token accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Cumulative prompt + completion tokens.
    pub tokens: u64,
    /// Cumulative cached prompt tokens.
    pub cached_tokens: u64,
    /// Cumulative estimated cost in USD.
    pub cost: f64,
    /// Prompt tokens of the most recent call, for the context-window gauge.
    pub last_prompt_tokens: u64,
}

/// A session: the unit of browser identity.
///
/// Each session owns a persistent browser profile directory keyed by its id,
/// so cookies and logged-in state survive process restarts. Sessions are
/// created and deleted by the user, never automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier; also keys the profile directory.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Preferred headless mode for this session's browser.
    pub headless: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Transient: a human is currently solving an intervention in this
    /// session. Never persisted.
    #[serde(skip)]
    pub is_verifying: bool,
    /// Rolling token/cost counters.
    #[serde(default)]
    pub stats: SessionStats,
    /// Plain-text summaries of prior successful tasks, oldest first.
    #[serde(default)]
    pub session_history: Vec<String>,
}

impl Session {
    /// Create a new session with a fresh id.
    pub fn new(name: impl Into<String>, headless: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            headless,
            created_at: now,
            updated_at: now,
            is_verifying: false,
            stats: SessionStats::default(),
            session_history: Vec::new(),
        }
    }

    /// Stamp `updated_at` after a mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
