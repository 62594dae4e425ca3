//! Scripted chat client for deterministic runs (tests and `UI_TEST` mode).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use invisibrow_types::{ChatRequest, ChatResponse, ChatUsage, InvisibrowError};

use crate::client::ChatScope;
use crate::ChatClient;

/// A chat client that replays a scripted queue of responses.
///
/// Each [`ScriptedChatClient::chat`] call pops the next response; an
/// exhausted script yields an error so tests fail loudly instead of
/// looping. Requests are captured for assertions on prompt content.
pub struct ScriptedChatClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<(ChatScope, ChatRequest)>>,
    usage: ChatUsage,
}

impl ScriptedChatClient {
    /// Build a client replaying the given JSON contents in order.
    pub fn new(script: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(script.into_iter().map(|s| Ok(s.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
            usage: ChatUsage {
                prompt_tokens: 100,
                cached_tokens: 10,
                completion_tokens: 50,
            },
        }
    }

    /// Build a client replaying a mix of contents and transport errors.
    pub fn with_outcomes(script: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            usage: ChatUsage {
                prompt_tokens: 100,
                cached_tokens: 10,
                completion_tokens: 50,
            },
        }
    }

    /// Override the usage attached to each scripted response.
    pub fn with_usage(mut self, usage: ChatUsage) -> Self {
        self.usage = usage;
        self
    }

    /// All requests observed so far, in call order.
    pub fn requests(&self) -> Vec<(ChatScope, ChatRequest)> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Number of responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("responses lock").len()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(
        &self,
        scope: &ChatScope,
        request: ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        let model = request.model.clone();
        self.requests
            .lock()
            .expect("requests lock")
            .push((scope.clone(), request));

        let next = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| InvisibrowError::Llm("scripted chat client exhausted".into()))?;
        match next {
            Ok(content) => Ok(ChatResponse {
                content,
                model,
                usage: self.usage,
            }),
            Err(message) => Err(InvisibrowError::Llm(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_types::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let client = ScriptedChatClient::new(vec![r#"{"a":1}"#, r#"{"a":2}"#]);
        let scope = ChatScope::new("s", "planner");

        let first = client.chat(&scope, request()).await.unwrap();
        assert_eq!(first.content, r#"{"a":1}"#);
        let second = client.chat(&scope, request()).await.unwrap();
        assert_eq!(second.content, r#"{"a":2}"#);
        assert!(client.chat(&scope, request()).await.is_err());
    }

    #[tokio::test]
    async fn captures_requests_for_assertions() {
        let client = ScriptedChatClient::new(vec!["{}"]);
        let scope = ChatScope::new("session-9", "watchdog");
        client.chat(&scope, request()).await.unwrap();

        let seen = client.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.session_id, "session-9");
        assert_eq!(seen[0].0.agent, "watchdog");
    }

    #[tokio::test]
    async fn scripted_errors_surface_as_llm_faults() {
        let client =
            ScriptedChatClient::with_outcomes(vec![Err("connection reset".into())]);
        let scope = ChatScope::new("s", "executor");
        let err = client.chat(&scope, request()).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
