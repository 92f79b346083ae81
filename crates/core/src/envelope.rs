//! The response envelope — the normalized unit of output crossing every
//! boundary (tool → engine → transport → client).
//!
//! Wire shape: `{type, data, frontend, metadata, description}`. Envelopes are
//! forwarded verbatim by the engine into the memory trail and to the
//! transport, so everything inside must already be JSON-safe (see
//! [`crate::sanitize`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of result kinds a tool or the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Narrative text for the user.
    Text,
    /// Tabular rows (array of objects sharing headers).
    Table,
    /// Chart payloads ready for client-side rendering.
    Chart,
    /// A computed value kept in the environment for later steps.
    Computed,
    /// A composed email draft.
    EmailDraft,
    /// Transport-level progress notice.
    Status,
    /// A terminal, user-visible failure for the current step.
    Error,
}

impl EnvelopeKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Chart => "chart",
            Self::Computed => "computed",
            Self::EmailDraft => "email_draft",
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

/// A single result envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Result kind, serialized as `type` on the wire.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// The JSON-safe payload.
    pub data: Value,

    /// Whether the client should render this envelope to the user.
    pub frontend: bool,

    /// Producer-specific metadata (headers, query text, error flags, ...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,

    /// Human-readable summary, re-injected into future decision prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Envelope {
    /// Create an envelope with the given kind and payload.
    pub fn new(kind: EnvelopeKind, data: Value) -> Self {
        Self {
            kind,
            data,
            frontend: true,
            metadata: serde_json::Map::new(),
            description: None,
        }
    }

    /// Mark this envelope as internal (not rendered to the user).
    pub fn internal(mut self) -> Self {
        self.frontend = false;
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Insert a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// A user-visible text envelope.
    pub fn text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::new(EnvelopeKind::Text, serde_json::json!([{ "text": text }]))
    }

    /// The error-flagged text envelope produced when a tool fails: the
    /// engine can always append *something* to the memory trail and keep
    /// deciding.
    pub fn error_text(producer: &str, message: &str) -> Self {
        Self::text(format!("{producer} failed: {message}"))
            .with_metadata("error", Value::Bool(true))
            .with_description(format!("{producer} execution failed"))
    }

    /// The terminal failure envelope surfaced to the transport boundary:
    /// machine-readable `code` plus a human-readable message.
    pub fn terminal_error(code: &str, message: &str) -> Self {
        Self::new(
            EnvelopeKind::Error,
            serde_json::json!([{ "text": message }]),
        )
        .with_metadata("code", Value::String(code.into()))
        .with_description(message)
    }

    /// Whether this envelope carries an error flag or is a terminal error.
    pub fn is_error(&self) -> bool {
        self.kind == EnvelopeKind::Error
            || self
                .metadata
                .get("error")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_type_and_frontend() {
        let envelope = Envelope::new(EnvelopeKind::Table, serde_json::json!([{"a": 1}]))
            .with_description("one row");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "table");
        assert_eq!(json["frontend"], true);
        assert_eq!(json["data"][0]["a"], 1);
        assert_eq!(json["description"], "one row");
    }

    #[test]
    fn error_text_is_flagged() {
        let envelope = Envelope::error_text("run_sql", "connection refused");
        assert_eq!(envelope.kind, EnvelopeKind::Text);
        assert!(envelope.is_error());
        assert!(envelope.data[0]["text"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }

    #[test]
    fn terminal_error_carries_code() {
        let envelope = Envelope::terminal_error("routing_failed", "no such tool");
        assert_eq!(envelope.kind, EnvelopeKind::Error);
        assert!(envelope.is_error());
        assert_eq!(envelope.metadata["code"], "routing_failed");
    }

    #[test]
    fn kind_roundtrip() {
        let json = serde_json::to_string(&EnvelopeKind::EmailDraft).unwrap();
        assert_eq!(json, r#""email_draft""#);
        let kind: EnvelopeKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, EnvelopeKind::EmailDraft);
    }

    #[test]
    fn internal_envelopes_skip_frontend() {
        let envelope = Envelope::new(EnvelopeKind::Computed, serde_json::json!({"x": 1})).internal();
        assert!(!envelope.frontend);
    }
}
