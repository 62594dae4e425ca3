//! Provider-neutral chat types for JSON-mode LLM calls.
//!
//! The transport is opaque to the agents: a request carries a model name,
//! messages, and an optional JSON schema the response must conform to; the
//! response carries the (JSON) content and the provider's usage report.
//!
//! API keys are read from environment variables at runtime and masked in
//! all `Display`/`Debug` output via [`MaskedApiKey`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message participant in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider usage report for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    /// Prompt tokens, including any cached portion.
    pub prompt_tokens: u64,
    /// The cached subset of the prompt tokens.
    pub cached_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
}

/// A JSON-mode chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// When set, the response content must be a JSON document conforming to
    /// this schema. Providers that support structured output enforce it;
    /// responses are validated again on the caller side regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            json_schema: None,
            max_tokens: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.json_schema = Some(schema);
        self
    }
}

/// A chat response: content plus the provider's usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: ChatUsage,
}

/// Wrapper that masks an API key in Display/Debug output.
///
/// Shows the first 8 characters followed by `...` (or `***` for short keys).
#[derive(Clone)]
pub struct MaskedApiKey(pub String);

impl MaskedApiKey {
    /// The full key, for use in request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaskedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() > 12 {
            write!(f, "{}...", &self.0[..8])
        } else {
            write!(f, "***")
        }
    }
}

impl fmt::Debug for MaskedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MaskedApiKey({self})")
    }
}
