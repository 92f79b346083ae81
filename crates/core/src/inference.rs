//! The structured inference contract.
//!
//! Every decision call and every tool-side generation (SQL planning, chart
//! planning, formatting, ...) goes through one trait: an instruction block,
//! the shared session context fields, and a JSON schema for the reply.
//! Implementations live in `datascope-providers`; how the backend reasons is
//! opaque here — this module only fixes the protocol around the call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::InferenceError;
use crate::session::{ChatMessage, SessionContext};

/// The shared context fields injected into every structured call.
///
/// Rendering is deterministic: with an unchanged session the rendered text
/// is byte-identical, which keeps downstream prompts reproducible.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub domain_context: String,
    pub user_request: String,
    pub memory_digest: String,
    pub transcript: Vec<ChatMessage>,
    pub failure_digest: String,
    /// `{tool_name: {description, inputs}}`; empty object when not routing.
    pub available_tools: Value,
    /// `{branch_id: description}`; empty object when not routing.
    pub available_branches: Value,
    /// Step-specific guidance from the orchestrator, if any.
    pub guidance: Option<String>,
}

impl PromptContext {
    /// Snapshot the session's digests and transcript.
    pub fn from_session(ctx: &SessionContext) -> Self {
        Self {
            domain_context: ctx.domain_context().to_string(),
            user_request: ctx.user_request.clone(),
            memory_digest: ctx.memory.render_for_prompt(),
            transcript: ctx.transcript.clone(),
            failure_digest: ctx.failures.render_for_prompt(),
            available_tools: Value::Object(serde_json::Map::new()),
            available_branches: Value::Object(serde_json::Map::new()),
            guidance: None,
        }
    }

    pub fn with_tools(mut self, tools: Value) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_branches(mut self, branches: Value) -> Self {
        self.available_branches = branches;
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    /// Render the context as labeled sections for the user turn of the
    /// structured call.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("## Domain context\n");
        out.push_str(&self.domain_context);
        out.push_str("\n\n## User request\n");
        out.push_str(&self.user_request);

        out.push_str("\n\n## Prior actions\n");
        out.push_str(&self.memory_digest);

        out.push_str("\n\n## Conversation so far\n");
        if self.transcript.is_empty() {
            out.push_str("(no prior messages)");
        } else {
            for message in &self.transcript {
                let role = match message.role {
                    crate::session::Role::User => "user",
                    crate::session::Role::Assistant => "assistant",
                };
                out.push_str(&format!("{role}: {}\n", message.content));
            }
        }

        out.push_str("\n\n## Prior failures\n");
        out.push_str(&self.failure_digest);

        if object_is_populated(&self.available_tools) {
            out.push_str("\n\n## Available tools\n");
            out.push_str(&self.available_tools.to_string());
        }
        if object_is_populated(&self.available_branches) {
            out.push_str("\n\n## Available branches\n");
            out.push_str(&self.available_branches.to_string());
        }
        if let Some(guidance) = &self.guidance {
            out.push_str("\n\n## Guidance\n");
            out.push_str(guidance);
        }

        out
    }
}

fn object_is_populated(value: &Value) -> bool {
    value.as_object().is_some_and(|map| !map.is_empty())
}

/// One structured inference request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// The role/instruction block (system prompt).
    pub instruction: String,
    /// Session context rendered into the user turn.
    pub context: PromptContext,
    /// JSON schema the reply must conform to.
    pub output_schema: Value,
    /// Optional generation cap.
    pub max_tokens: Option<u32>,
}

/// A backend that can answer one structured call.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Issue one structured call; the reply conforms to
    /// `request.output_schema` or the call fails with `Malformed`.
    async fn structured(&self, request: StructuredRequest) -> Result<Value, InferenceError>;
}
