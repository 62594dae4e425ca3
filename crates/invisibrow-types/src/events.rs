//! Events carried on the process-wide bus between the core and the UI.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log event shown in the UI feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Signals exchanged between the orchestration core and the UI layer.
///
/// `VerificationNeeded` / `VerificationResolved` form the intervention
/// handshake: every `VerificationNeeded` for a session is followed by
/// exactly one `VerificationResolved` or by the task's cancellation.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A log line for the UI feed.
    Log {
        message: String,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    /// A human must interact with the real browser (CAPTCHA, login wall).
    VerificationNeeded {
        session_id: String,
        reason: String,
        url: String,
    },
    /// The human finished; the paused task may resume.
    VerificationResolved { session_id: String },
    /// A session's rolling stats changed after an LLM call.
    SessionStatsUpdated { session_id: String },
}

impl CoreEvent {
    /// Build a log event stamped with the current time.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        CoreEvent::Log {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }
}
