//! Opaque JSON-mode LLM transport with usage reporting.
//!
//! Agents see one interface: [`ChatClient::chat`] takes a model, messages,
//! and an optional JSON schema, and returns content plus a usage report.
//! The HTTP implementation routes to Anthropic or OpenAI by model name and
//! records every request/response pair to the message audit directory.

mod accounting;
mod client;
mod mock;
mod pricing;
mod transcript;

pub use accounting::TokenAccounting;
pub use client::{validate_request, ChatScope, HttpChatClient};
pub use mock::ScriptedChatClient;
pub use pricing::{estimate_cost, model_rates, ModelRates};
pub use transcript::TranscriptWriter;

use async_trait::async_trait;

use invisibrow_types::{ChatRequest, ChatResponse, InvisibrowError};

/// Opaque JSON-mode LLM call with usage reporting.
///
/// `scope` names the session and agent on whose behalf the call is made, so
/// the transport can file its audit transcript; it carries no prompt
/// content.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        scope: &client::ChatScope,
        request: ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError>;
}
