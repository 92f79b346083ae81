//! Output formatter tool — turns accumulated state plus guidance into one
//! polished, user-facing text reply.
//!
//! Downstream steps call this to present raw results (tables, computed
//! values) as a single well-structured message with consistent style.

use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::Envelope;
use datascope_core::error::ToolError;
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str,
};
use serde::Deserialize;
use serde_json::Value;

const FORMATTER_INSTRUCTION: &str = "\
You write the user-facing reply for a data analysis session. Read the domain \
context and the conversation, consider prior tool results in memory, and \
follow the guidance about what to present and in which style. Produce a \
single, well-structured, markdown-safe text answer; do not invent numbers \
that are not in memory.";

#[derive(Debug, Deserialize)]
struct FormatterPlan {
    output_text: String,
}

fn formatter_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "output_text": {
                "type": "string",
                "description": "Single polished text reply presenting the data per the guidance"
            }
        },
        "required": ["output_text"]
    })
}

/// Format a clean natural-language response from session state and guidance.
pub struct FormatterTool {
    backend: Arc<dyn InferenceBackend>,
}

impl FormatterTool {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolCapability for FormatterTool {
    fn name(&self) -> &str {
        "format_output"
    }

    fn description(&self) -> &str {
        "Generate a polished, markdown-friendly text response based on the \
         current context, memory, conversation history, and explicit \
         formatting guidance"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().required(
            "guidance",
            "string",
            "How to present the answer (tone, audience, sections, bullets, callouts)",
        )
    }

    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        let guidance = required_str(inputs, "guidance")?;

        let request = StructuredRequest {
            instruction: FORMATTER_INSTRUCTION.into(),
            context: PromptContext::from_session(ctx).with_guidance(guidance),
            output_schema: formatter_plan_schema(),
            max_tokens: None,
        };
        let reply = self.backend.structured(request).await?;
        let plan: FormatterPlan = serde_json::from_value(reply).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "format_output".into(),
                reason: format!("formatter returned an invalid reply: {e}"),
            }
        })?;

        Ok(envelope_stream(vec![Envelope::text(plan.output_text)]))
    }
}
