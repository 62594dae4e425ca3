//! Service wiring: builds the stores, bus, LLM transport, and scheduler
//! into one handle exposing the operations the UI layer consumes.
//!
//! With `UI_TEST=1` the service runs deterministic mocks for both the LLM
//! and the browser driver; otherwise it uses the HTTP chat client and
//! expects the embedding application to supply a real page-driver
//! integration (acquiring a driver without one fails with a clear error).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use invisibrow_agent::planner::Planner;
use invisibrow_browser::{DriverFactory, MockDriverFactory, PageDriver, ProfileManager};
use invisibrow_bus::EventBus;
use invisibrow_llm::{
    ChatClient, ChatScope, HttpChatClient, TokenAccounting, TranscriptWriter,
};
use invisibrow_memory::MemoryStore;
use invisibrow_scheduler::{Scheduler, SchedulerConfig};
use invisibrow_store::{SessionStore, TaskStore};
use invisibrow_types::config;
use invisibrow_types::{ChatRequest, ChatResponse, ChatUsage, InvisibrowConfig, InvisibrowError};

/// Placeholder factory used when no real browser integration is wired in.
struct UnconfiguredDriverFactory;

#[async_trait]
impl DriverFactory for UnconfiguredDriverFactory {
    async fn acquire(
        &self,
        _session_id: &str,
        _headless: bool,
    ) -> Result<Arc<dyn PageDriver>, InvisibrowError> {
        Err(InvisibrowError::Browser(
            "no page driver integration configured (set UI_TEST=1 for mock execution)".into(),
        ))
    }
}

/// Deterministic chat client for `UI_TEST` runs: answers every request by
/// the shape of its schema, so any agent flow completes without an LLM.
struct UiTestChatClient;

#[async_trait]
impl ChatClient for UiTestChatClient {
    async fn chat(
        &self,
        _scope: &ChatScope,
        request: ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        let properties = request
            .json_schema
            .as_ref()
            .and_then(|s| s.get("properties"))
            .cloned()
            .unwrap_or(json!({}));
        let content = if properties.get("keywords").is_some() {
            json!({"keywords": ["mock", "test", "task"]})
        } else if properties.get("command").is_some() {
            json!({"thought": "mock run", "command": "finish", "input": {"answer": "mock result"}})
        } else if properties.get("action").is_some() {
            json!({"thought": "mock action", "action": "answer", "answer": "mock result"})
        } else if properties.get("needsIntervention").is_some() {
            json!({"isStuck": false, "needsIntervention": false})
        } else {
            json!({"summary": "mock result", "extracted": {}})
        };
        Ok(ChatResponse {
            content: content.to_string(),
            model: request.model,
            usage: ChatUsage {
                prompt_tokens: 10,
                cached_tokens: 0,
                completion_tokens: 5,
            },
        })
    }
}

/// The assembled orchestration core.
pub struct Service {
    pub config: InvisibrowConfig,
    pub sessions: Arc<SessionStore>,
    pub tasks: Arc<TaskStore>,
    pub memory: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub scheduler: Scheduler,
    pub profiles: ProfileManager,
}

impl Service {
    /// Build the full service from configuration and the storage directory.
    pub fn build() -> Result<Self, InvisibrowError> {
        let config = InvisibrowConfig::load()?;
        let storage = config::storage_dir();
        std::fs::create_dir_all(&storage).map_err(|e| {
            InvisibrowError::Config(format!("failed to create {}: {e}", storage.display()))
        })?;

        let sessions = Arc::new(SessionStore::load(config::sessions_path())?);
        let tasks = Arc::new(TaskStore::load(config::tasks_path())?);
        let memory = Arc::new(MemoryStore::open(&config::memory_db_path())?);
        let bus = EventBus::new(256);
        let accounting = Arc::new(TokenAccounting::new(sessions.clone(), bus.clone()));
        let profiles = ProfileManager::new(storage.join("session"));

        let ui_test = config::ui_test_enabled();
        let chat: Arc<dyn ChatClient> = if ui_test {
            info!("UI_TEST enabled: using deterministic mock chat client");
            Arc::new(UiTestChatClient)
        } else {
            let transcripts = TranscriptWriter::new(storage.join("message"));
            Arc::new(HttpChatClient::new(Some(transcripts))?)
        };
        let drivers: Arc<dyn DriverFactory> = if ui_test {
            info!("UI_TEST enabled: using mock page driver");
            MockDriverFactory::new()
        } else {
            Arc::new(UnconfiguredDriverFactory)
        };

        let planner = Arc::new(Planner::new(
            chat,
            memory.clone(),
            bus.clone(),
            drivers,
            config.models.clone(),
        ));
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: config.max_concurrent_tasks,
            },
            tasks.clone(),
            sessions.clone(),
            accounting,
            planner,
            bus.clone(),
        );

        Ok(Self {
            config,
            sessions,
            tasks,
            memory,
            bus,
            scheduler,
            profiles,
        })
    }

    /// Delete a session along with its browser profile directory.
    pub fn delete_session(&self, session_id: &str) -> Result<bool, InvisibrowError> {
        let deleted = self.sessions.delete(session_id)?;
        if deleted {
            self.profiles.delete_profile(session_id)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_types::ChatMessage;

    #[tokio::test]
    async fn ui_test_client_answers_by_schema_shape() {
        let client = UiTestChatClient;
        let scope = ChatScope::new("s", "planner");

        let keyword_request = ChatRequest::new(
            "claude-sonnet-4-20250514",
            vec![ChatMessage::user("extract")],
        )
        .with_schema(json!({"type": "object", "properties": {"keywords": {}}, "required": []}));
        let response = client.chat(&scope, keyword_request).await.unwrap();
        assert!(response.content.contains("keywords"));

        let plan_request =
            ChatRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("plan")])
                .with_schema(json!({"type": "object", "properties": {"command": {}}, "required": []}));
        let response = client.chat(&scope, plan_request).await.unwrap();
        assert!(response.content.contains("finish"));
    }

    #[tokio::test]
    async fn unconfigured_factory_fails_clearly() {
        let factory = UnconfiguredDriverFactory;
        let err = match factory.acquire("s", true).await {
            Err(e) => e,
            Ok(_) => panic!("expected acquire to fail"),
        };
        assert!(err.to_string().contains("UI_TEST"));
    }
}
