//! Email tool — composes a professional email from user intent and session
//! context, then hands the draft to a [`Mailer`].
//!
//! Credential acquisition for any mail provider stays outside this crate:
//! the default mailer only drafts. A deployment with an authenticated mail
//! service plugs in its own `Mailer` implementation.

use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::{Envelope, EnvelopeKind};
use datascope_core::error::ToolError;
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const EMAIL_INSTRUCTION: &str = "\
You compose a professional email from the user's intent and the session \
context. Determine the recipient from the guidance or conversation, write a \
clear subject line and a well-formatted body, and briefly explain your \
composition choices.";

/// A composed email ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// How a draft left the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Composed but not sent (no authenticated mail service).
    Drafted,
    /// Handed to a mail service for sending.
    Sent,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::Sent => "sent",
        }
    }
}

/// Seam to an external mail service.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, draft: &EmailDraft) -> Result<DeliveryStatus, ToolError>;
}

/// Default mailer: keeps the draft, sends nothing.
pub struct DraftOnlyMailer;

#[async_trait]
impl Mailer for DraftOnlyMailer {
    async fn deliver(&self, _draft: &EmailDraft) -> Result<DeliveryStatus, ToolError> {
        Ok(DeliveryStatus::Drafted)
    }
}

#[derive(Debug, Deserialize)]
struct EmailPlan {
    recipient_email: String,
    subject: String,
    body: String,
    #[serde(default)]
    reasoning: String,
}

fn email_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "recipient_email": {
                "type": "string",
                "description": "Email address of the recipient"
            },
            "subject": {
                "type": "string",
                "description": "Clear, professional subject line"
            },
            "body": {
                "type": "string",
                "description": "Well-formatted email body text"
            },
            "reasoning": {
                "type": "string",
                "description": "Brief explanation of composition choices"
            }
        },
        "required": ["recipient_email", "subject", "body"]
    })
}

/// Compose an email draft and pass it to the configured mailer.
pub struct EmailTool {
    backend: Arc<dyn InferenceBackend>,
    mailer: Arc<dyn Mailer>,
}

impl EmailTool {
    pub fn new(backend: Arc<dyn InferenceBackend>, mailer: Arc<dyn Mailer>) -> Self {
        Self { backend, mailer }
    }
}

#[async_trait]
impl ToolCapability for EmailTool {
    fn name(&self) -> &str {
        "draft_email"
    }

    fn description(&self) -> &str {
        "Compose a professional email (recipient, subject, body) from the \
         conversation and guidance; drafts are handed to the configured mail \
         service"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .required(
                "guidance",
                "string",
                "What the email should accomplish and any recipient hints",
            )
            .optional(
                "email_purpose",
                "string",
                "The purpose/type of email (follow-up, request, notification)",
            )
    }

    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        let guidance = required_str(inputs, "guidance")?;
        let purpose = inputs
            .get("email_purpose")
            .and_then(Value::as_str)
            .unwrap_or("general");

        let request = StructuredRequest {
            instruction: format!("{EMAIL_INSTRUCTION}\n\nEmail purpose: {purpose}"),
            context: PromptContext::from_session(ctx).with_guidance(guidance),
            output_schema: email_plan_schema(),
            max_tokens: None,
        };
        let reply = self.backend.structured(request).await?;
        let plan: EmailPlan = serde_json::from_value(reply).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "draft_email".into(),
                reason: format!("composer returned an invalid email plan: {e}"),
            }
        })?;

        let draft = EmailDraft {
            recipient: plan.recipient_email,
            subject: plan.subject,
            body: plan.body,
        };
        let status = self.mailer.deliver(&draft).await?;

        let envelope = Envelope::new(
            EnvelopeKind::EmailDraft,
            serde_json::json!({
                "recipient": draft.recipient,
                "subject": draft.subject,
                "body": draft.body,
            }),
        )
        .with_metadata("delivery", Value::String(status.as_str().into()))
        .with_metadata("reasoning", Value::String(plan.reasoning))
        .with_description(format!("Email to {} ({})", draft.recipient, status.as_str()));

        Ok(envelope_stream(vec![envelope]))
    }
}
