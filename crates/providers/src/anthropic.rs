//! Anthropic native backend for structured inference calls.
//!
//! Uses the Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - Instruction block as the top-level `system` field
//! - Structured output by declaring a single `emit` tool carrying the
//!   request's JSON schema and forcing it via `tool_choice`, so the reply
//!   arrives as a validated `tool_use` input block rather than free text

use async_trait::async_trait;
use datascope_core::error::InferenceError;
use datascope_core::inference::{InferenceBackend, StructuredRequest};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Name of the forced reply tool.
const EMIT_TOOL: &str = "emit";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a new backend for the given key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }

    /// Override the base URL (testing, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the Messages API request body for a structured call.
    fn build_body(&self, request: &StructuredRequest) -> Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "system": request.instruction,
            "messages": [{
                "role": "user",
                "content": request.context.render(),
            }],
            "tools": [{
                "name": EMIT_TOOL,
                "description": "Return the structured reply.",
                "input_schema": request.output_schema,
            }],
            "tool_choice": { "type": "tool", "name": EMIT_TOOL },
        })
    }

    /// Pull the forced tool's input out of the response content blocks.
    fn extract_structured(response: MessagesResponse) -> Result<Value, InferenceError> {
        for block in response.content {
            if let ContentBlock::ToolUse { name, input } = block {
                if name == EMIT_TOOL {
                    return Ok(input);
                }
            }
        }
        Err(InferenceError::Malformed(
            "response contained no structured reply block".into(),
        ))
    }
}

#[async_trait]
impl InferenceBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn structured(&self, request: StructuredRequest) -> Result<Value, InferenceError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(backend = "anthropic", model = %self.model, "Sending structured request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(e.to_string())
                } else {
                    InferenceError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(InferenceError::NotConfigured(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(InferenceError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: MessagesResponse = response.json().await.map_err(|e| {
            InferenceError::Malformed(format!("failed to parse Anthropic response: {e}"))
        })?;

        Self::extract_structured(api_resp)
    }
}

// ── Messages API wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use datascope_core::inference::PromptContext;
    use datascope_core::session::SessionContext;

    fn sample_request() -> StructuredRequest {
        let mut session = SessionContext::new("{}");
        session.begin_request("revenue by region");
        StructuredRequest {
            instruction: "You are a planner.".into(),
            context: PromptContext::from_session(&session),
            output_schema: serde_json::json!({
                "type": "object",
                "properties": {"sql_query": {"type": "string"}},
                "required": ["sql_query"]
            }),
            max_tokens: None,
        }
    }

    #[test]
    fn body_forces_the_emit_tool() {
        let backend = AnthropicBackend::new("key", "claude-sonnet-4-20250514");
        let body = backend.build_body(&sample_request());
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "emit");
        assert_eq!(body["tools"][0]["name"], "emit");
        assert_eq!(
            body["tools"][0]["input_schema"]["properties"]["sql_query"]["type"],
            "string"
        );
    }

    #[test]
    fn body_carries_instruction_and_context() {
        let backend = AnthropicBackend::new("key", "claude-sonnet-4-20250514");
        let body = backend.build_body(&sample_request());
        assert_eq!(body["system"], "You are a planner.");
        let user_turn = body["messages"][0]["content"].as_str().unwrap();
        assert!(user_turn.contains("revenue by region"));
    }

    #[test]
    fn extracts_tool_use_block() {
        let response = MessagesResponse {
            content: vec![
                ContentBlock::Text {
                    text: "thinking...".into(),
                },
                ContentBlock::ToolUse {
                    name: "emit".into(),
                    input: serde_json::json!({"sql_query": "SELECT 1"}),
                },
            ],
        };
        let value = AnthropicBackend::extract_structured(response).unwrap();
        assert_eq!(value["sql_query"], "SELECT 1");
    }

    #[test]
    fn missing_tool_use_is_malformed() {
        let response = MessagesResponse {
            content: vec![ContentBlock::Text {
                text: "no structure here".into(),
            }],
        };
        let err = AnthropicBackend::extract_structured(response).unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[test]
    fn response_blocks_deserialize() {
        let raw = r#"{"content": [
            {"type": "text", "text": "ok"},
            {"type": "tool_use", "id": "tu_1", "name": "emit", "input": {"a": 1}}
        ]}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
    }
}
