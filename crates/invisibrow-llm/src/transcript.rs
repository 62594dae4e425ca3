//! Audit transcripts of every LLM request/response pair.
//!
//! Files land at `message/<session_id>/<agent_type>/msg_<yyyymmdd_hhmmss>.json`
//! under the storage root. A per-process sequence number disambiguates calls
//! made within the same second.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use invisibrow_types::{ChatRequest, ChatResponse, InvisibrowError};

use crate::client::ChatScope;

/// Writes request/response transcripts under a message root directory.
pub struct TranscriptWriter {
    root: PathBuf,
    seq: AtomicU64,
}

impl TranscriptWriter {
    /// `root` is the `message/` directory under the storage root.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            seq: AtomicU64::new(0),
        }
    }

    /// Record one request/response pair. Returns the file path written.
    pub fn record(
        &self,
        scope: &ChatScope,
        request: &ChatRequest,
        response: &ChatResponse,
    ) -> Result<PathBuf, InvisibrowError> {
        let dir = self.root.join(&scope.session_id).join(scope.agent);
        std::fs::create_dir_all(&dir).map_err(|e| {
            InvisibrowError::Llm(format!("failed to create {}: {e}", dir.display()))
        })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("msg_{stamp}_{seq:04}.json"));

        let payload = json!({
            "recorded_at": Utc::now().to_rfc3339(),
            "session_id": scope.session_id,
            "agent": scope.agent,
            "request": request,
            "response": response,
        });
        let content = serde_json::to_string_pretty(&payload)
            .map_err(|e| InvisibrowError::Llm(format!("failed to serialize transcript: {e}")))?;
        std::fs::write(&path, content).map_err(|e| {
            InvisibrowError::Llm(format!("failed to write {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "transcript recorded");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_types::{ChatMessage, ChatUsage};
    use tempfile::TempDir;

    fn sample_pair() -> (ChatRequest, ChatResponse) {
        (
            ChatRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("hi")]),
            ChatResponse {
                content: "{}".into(),
                model: "claude-sonnet-4-20250514".into(),
                usage: ChatUsage::default(),
            },
        )
    }

    #[test]
    fn transcript_written_under_session_and_agent() {
        let dir = TempDir::new().unwrap();
        let writer = TranscriptWriter::new(dir.path().to_path_buf());
        let scope = ChatScope::new("session-1", "planner");
        let (req, resp) = sample_pair();

        let path = writer.record(&scope, &req, &resp).unwrap();
        assert!(path.starts_with(dir.path().join("session-1").join("planner")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("msg_"));
        assert!(name.ends_with(".json"));

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["agent"], "planner");
        assert_eq!(value["request"]["model"], "claude-sonnet-4-20250514");
    }

    #[test]
    fn same_second_calls_get_distinct_files() {
        let dir = TempDir::new().unwrap();
        let writer = TranscriptWriter::new(dir.path().to_path_buf());
        let scope = ChatScope::new("session-1", "executor");
        let (req, resp) = sample_pair();

        let a = writer.record(&scope, &req, &resp).unwrap();
        let b = writer.record(&scope, &req, &resp).unwrap();
        assert_ne!(a, b);
    }
}
