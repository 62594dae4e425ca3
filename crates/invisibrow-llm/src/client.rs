//! HTTP chat client for Anthropic and OpenAI providers.
//!
//! Routes completion requests to the provider matching the model name.
//! JSON mode is implemented the way each provider supports it: a forced
//! tool call with the schema as `input_schema` on Anthropic, and
//! `response_format: json_schema` on OpenAI.
//!
//! # Security
//!
//! - API keys read exclusively from environment variables.
//! - No HTTP redirect following.
//! - Response body size capped at 10 MB.
//! - API keys masked in all log output via `MaskedApiKey`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use invisibrow_types::{
    ChatRequest, ChatResponse, ChatRole, ChatUsage, InvisibrowError, MaskedApiKey,
};

use crate::transcript::TranscriptWriter;
use crate::ChatClient;

/// Default Anthropic API endpoint. Overridable via `ANTHROPIC_BASE_URL`.
pub const DEFAULT_ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";

/// Default OpenAI API endpoint. Overridable via `OPENAI_BASE_URL`.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com";

/// Maximum response body size (10 MB).
const MAX_RESPONSE_BODY_BYTES: u64 = 10_000_000;

/// Default maximum completion tokens if not specified in the request.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Name of the forced tool used for Anthropic structured output.
const SCHEMA_TOOL_NAME: &str = "respond";

/// Who a chat call is made on behalf of; names the transcript location.
#[derive(Debug, Clone)]
pub struct ChatScope {
    pub session_id: String,
    /// `planner`, `executor`, or `watchdog`.
    pub agent: &'static str,
}

impl ChatScope {
    pub fn new(session_id: impl Into<String>, agent: &'static str) -> Self {
        Self {
            session_id: session_id.into(),
            agent,
        }
    }
}

fn is_valid_model_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'
}

/// Validate a chat request before sending.
///
/// Checks model-name charset, non-empty messages, and bounded total prompt
/// size (1 MB of message content).
pub fn validate_request(request: &ChatRequest) -> Result<(), InvisibrowError> {
    if request.model.is_empty() {
        return Err(InvisibrowError::Llm("model name must not be empty".into()));
    }
    if !request.model.chars().all(is_valid_model_char) {
        return Err(InvisibrowError::Llm(format!(
            "model name contains invalid characters: '{}'",
            request.model
        )));
    }
    if request.messages.is_empty() {
        return Err(InvisibrowError::Llm("messages must not be empty".into()));
    }
    let total: usize = request.messages.iter().map(|m| m.content.len()).sum();
    if total > 1_000_000 {
        return Err(InvisibrowError::Llm(format!(
            "prompt too large: {total} bytes (max 1,000,000)"
        )));
    }
    Ok(())
}

enum Provider {
    Anthropic,
    OpenAi,
}

fn provider_for_model(model: &str) -> Result<Provider, InvisibrowError> {
    if model.starts_with("claude") {
        Ok(Provider::Anthropic)
    } else if model.starts_with("gpt") || model.starts_with('o') {
        Ok(Provider::OpenAi)
    } else {
        Err(InvisibrowError::Llm(format!(
            "no provider known for model '{model}'"
        )))
    }
}

fn read_env_key(var: &str) -> Result<MaskedApiKey, InvisibrowError> {
    let key = std::env::var(var)
        .map_err(|_| InvisibrowError::Llm(format!("{var} is not set in the environment")))?;
    if key.trim().is_empty() {
        return Err(InvisibrowError::Llm(format!("{var} is empty")));
    }
    Ok(MaskedApiKey(key))
}

fn base_url(env_var: &str, default: &str) -> String {
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// HTTP chat client routing to Anthropic or OpenAI by model name.
pub struct HttpChatClient {
    http: reqwest::Client,
    transcripts: Option<TranscriptWriter>,
}

impl HttpChatClient {
    /// Build the client: no redirects, 10 s connect timeout, 120 s request
    /// timeout. When `transcripts` is set, every request/response pair is
    /// recorded under the message audit directory.
    pub fn new(transcripts: Option<TranscriptWriter>) -> Result<Self, InvisibrowError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent("invisibrow/0.1")
            .build()
            .map_err(|e| InvisibrowError::Llm(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, transcripts })
    }

    async fn complete_anthropic(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        let api_key = read_env_key("ANTHROPIC_API_KEY")?;
        debug!(provider = "anthropic", key = %api_key, "resolved API key");
        let url = format!(
            "{}/v1/messages",
            base_url("ANTHROPIC_BASE_URL", DEFAULT_ANTHROPIC_ENDPOINT)
        );

        // System messages lift into the top-level `system` field.
        let mut system_text = String::new();
        let mut messages = Vec::new();
        for msg in &request.messages {
            if msg.role == ChatRole::System {
                if !system_text.is_empty() {
                    system_text.push('\n');
                }
                system_text.push_str(&msg.content);
            } else {
                messages.push(json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                }));
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system_text.is_empty() {
            body["system"] = Value::String(system_text);
        }
        if let Some(schema) = &request.json_schema {
            body["tools"] = json!([{
                "name": SCHEMA_TOOL_NAME,
                "description": "Return the structured response.",
                "input_schema": schema,
            }]);
            body["tool_choice"] = json!({"type": "tool", "name": SCHEMA_TOOL_NAME});
        }

        info!(
            provider = "anthropic",
            model = %request.model,
            message_count = request.messages.len(),
            "sending chat request"
        );

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", api_key.expose())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InvisibrowError::Llm(format!("Anthropic request failed: {e}")))?;

        let json = read_bounded_json(resp, "Anthropic").await?;
        parse_anthropic_response(&json, &request.model)
    }

    async fn complete_openai(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        let api_key = read_env_key("OPENAI_API_KEY")?;
        debug!(provider = "openai", key = %api_key, "resolved API key");
        let url = format!(
            "{}/v1/chat/completions",
            base_url("OPENAI_BASE_URL", DEFAULT_OPENAI_ENDPOINT)
        );

        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.json_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": schema},
            });
        }

        info!(
            provider = "openai",
            model = %request.model,
            message_count = request.messages.len(),
            "sending chat request"
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key.expose())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InvisibrowError::Llm(format!("OpenAI request failed: {e}")))?;

        let json = read_bounded_json(resp, "OpenAI").await?;
        parse_openai_response(&json, &request.model)
    }
}

async fn read_bounded_json(
    resp: reqwest::Response,
    provider: &str,
) -> Result<Value, InvisibrowError> {
    if let Some(len) = resp.content_length() {
        if len > MAX_RESPONSE_BODY_BYTES {
            return Err(InvisibrowError::Llm(format!(
                "{provider} response too large: {len} bytes"
            )));
        }
    }
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| InvisibrowError::Llm(format!("failed to read {provider} response: {e}")))?;
    if text.len() as u64 > MAX_RESPONSE_BODY_BYTES {
        return Err(InvisibrowError::Llm(format!(
            "{provider} response body too large: {} bytes",
            text.len()
        )));
    }
    if !status.is_success() {
        return Err(InvisibrowError::Llm(format!(
            "{provider} API returned {status}: {text}"
        )));
    }
    serde_json::from_str(&text)
        .map_err(|e| InvisibrowError::Llm(format!("failed to parse {provider} response: {e}")))
}

fn parse_anthropic_response(json: &Value, model: &str) -> Result<ChatResponse, InvisibrowError> {
    let mut content = String::new();
    if let Some(blocks) = json.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        if !content.is_empty() {
                            content.push('\n');
                        }
                        content.push_str(text);
                    }
                }
                // The forced schema tool carries the structured response
                // as its input object.
                Some("tool_use") => {
                    if block.get("name").and_then(|n| n.as_str()) == Some(SCHEMA_TOOL_NAME) {
                        if let Some(input) = block.get("input") {
                            content = input.to_string();
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let usage_obj = json.get("usage").cloned().unwrap_or(Value::Null);
    let usage = ChatUsage {
        prompt_tokens: usage_obj
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + usage_obj
                .get("cache_read_input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        cached_tokens: usage_obj
            .get("cache_read_input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        completion_tokens: usage_obj
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };

    let response_model = json
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(model)
        .to_string();

    info!(
        provider = "anthropic",
        model = %response_model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "chat response received"
    );

    Ok(ChatResponse {
        content,
        model: response_model,
        usage,
    })
}

fn parse_openai_response(json: &Value, model: &str) -> Result<ChatResponse, InvisibrowError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| InvisibrowError::Llm("OpenAI response missing choices".into()))?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let usage_obj = json.get("usage").cloned().unwrap_or(Value::Null);
    let usage = ChatUsage {
        prompt_tokens: usage_obj
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        cached_tokens: usage_obj
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        completion_tokens: usage_obj
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    };

    let response_model = json
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(model)
        .to_string();

    info!(
        provider = "openai",
        model = %response_model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "chat response received"
    );

    Ok(ChatResponse {
        content,
        model: response_model,
        usage,
    })
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn chat(
        &self,
        scope: &ChatScope,
        request: ChatRequest,
    ) -> Result<ChatResponse, InvisibrowError> {
        validate_request(&request)?;
        let response = match provider_for_model(&request.model)? {
            Provider::Anthropic => self.complete_anthropic(&request).await,
            Provider::OpenAi => self.complete_openai(&request).await,
        }?;
        if let Some(transcripts) = &self.transcripts {
            transcripts.record(scope, &request, &response)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invisibrow_types::ChatMessage;
    use serde_json::json;

    fn sample_request() -> ChatRequest {
        ChatRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn request_validation() {
        assert!(validate_request(&sample_request()).is_ok());

        let mut req = sample_request();
        req.model = String::new();
        assert!(validate_request(&req).is_err());

        let mut req = sample_request();
        req.model = "bad model".into();
        assert!(validate_request(&req).is_err());

        let mut req = sample_request();
        req.messages = vec![];
        assert!(validate_request(&req).is_err());

        let mut req = sample_request();
        req.messages = vec![ChatMessage::user("x".repeat(1_000_001))];
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn provider_routing_by_model_name() {
        assert!(matches!(
            provider_for_model("claude-sonnet-4-20250514"),
            Ok(Provider::Anthropic)
        ));
        assert!(matches!(provider_for_model("gpt-4o"), Ok(Provider::OpenAi)));
        assert!(matches!(
            provider_for_model("o3-mini"),
            Ok(Provider::OpenAi)
        ));
        assert!(provider_for_model("llama-70b").is_err());
    }

    #[test]
    fn anthropic_text_response_parsed() {
        let json = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "{\"answer\": 42}"}],
            "usage": {"input_tokens": 25, "output_tokens": 10, "cache_read_input_tokens": 5}
        });
        let resp = parse_anthropic_response(&json, "claude-sonnet-4-20250514").unwrap();
        assert_eq!(resp.content, "{\"answer\": 42}");
        // Prompt total includes the cached portion.
        assert_eq!(resp.usage.prompt_tokens, 30);
        assert_eq!(resp.usage.cached_tokens, 5);
        assert_eq!(resp.usage.completion_tokens, 10);
    }

    #[test]
    fn anthropic_tool_use_response_parsed_as_json_content() {
        let json = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "tool_use", "name": "respond", "input": {"command": "finish"}}
            ],
            "usage": {"input_tokens": 40, "output_tokens": 12}
        });
        let resp = parse_anthropic_response(&json, "claude-sonnet-4-20250514").unwrap();
        let parsed: Value = serde_json::from_str(&resp.content).unwrap();
        assert_eq!(parsed["command"], "finish");
    }

    #[test]
    fn openai_response_parsed_with_cached_tokens() {
        let json = json!({
            "model": "gpt-4o-2024-05-13",
            "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 20,
                "prompt_tokens_details": {"cached_tokens": 60}
            }
        });
        let resp = parse_openai_response(&json, "gpt-4o").unwrap();
        assert_eq!(resp.content, "{\"ok\": true}");
        assert_eq!(resp.usage.prompt_tokens, 100);
        assert_eq!(resp.usage.cached_tokens, 60);
        assert_eq!(resp.usage.completion_tokens, 20);
    }

    #[test]
    fn openai_missing_choices_is_error() {
        let json = json!({"model": "gpt-4o", "usage": {}});
        assert!(parse_openai_response(&json, "gpt-4o").is_err());
    }
}
