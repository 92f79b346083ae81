//! Tool capability contract — the abstraction over pluggable units of work.
//!
//! A tool is a named, described, schema-typed capability: given the session
//! context and structured inputs conforming to its declared schema, it
//! produces a finite, non-restartable stream of response envelopes.
//! Invocation returns a tagged outcome (`Ok(stream)` | `Err(failure)`); the
//! engine converts failures into error-flagged envelopes so nothing ever
//! unwinds across this boundary.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ToolError;
use crate::session::SessionContext;

/// A finite, ordered stream of envelopes produced by one tool invocation.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// Wrap an already-computed sequence of envelopes as a stream.
pub fn envelope_stream(envelopes: Vec<Envelope>) -> EnvelopeStream {
    Box::pin(futures::stream::iter(envelopes))
}

/// Structured inputs passed to a tool invocation.
pub type ToolInputs = serde_json::Map<String, Value>;

/// Declared shape of one tool input field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    /// JSON type name ("string", "number", ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
}

/// A tool's declared input schema: ordered field name → field shape.
///
/// `BTreeMap` keeps prompt rendering deterministic across calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema(pub BTreeMap<String, InputField>);

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn required(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.0.insert(
            name.to_string(),
            InputField {
                kind: kind.to_string(),
                description: description.to_string(),
                required: true,
            },
        );
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.0.insert(
            name.to_string(),
            InputField {
                kind: kind.to_string(),
                description: description.to_string(),
                required: false,
            },
        );
        self
    }
}

/// Extract a required string input, or fail with `InvalidInputs`.
pub fn required_str<'a>(inputs: &'a ToolInputs, name: &str) -> Result<&'a str, ToolError> {
    inputs
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInputs(format!("missing required input '{name}'")))
}

/// The core tool trait.
///
/// Tools may hold long-lived resources (a pooled database connection, an
/// HTTP client) scoped to the tool instance, not to a single call.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    /// Unique name within its branch (e.g. "run_sql").
    fn name(&self) -> &str;

    /// Description shown to the decision node.
    fn description(&self) -> &str;

    /// Declared input schema.
    fn input_schema(&self) -> InputSchema;

    /// Execute with the session context and validated inputs, producing an
    /// ordered stream of envelopes or a contained failure.
    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeKind;
    use futures::StreamExt;

    struct EchoTool;

    #[async_trait]
    impl ToolCapability for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes the guidance back as text"
        }
        fn input_schema(&self) -> InputSchema {
            InputSchema::new().required("guidance", "string", "Text to echo")
        }
        async fn invoke(
            &self,
            _ctx: &SessionContext,
            inputs: &ToolInputs,
        ) -> Result<EnvelopeStream, ToolError> {
            let guidance = required_str(inputs, "guidance")?;
            Ok(envelope_stream(vec![Envelope::text(guidance)]))
        }
    }

    #[tokio::test]
    async fn invoke_yields_envelopes_in_order() {
        let ctx = SessionContext::new("{}");
        let mut inputs = ToolInputs::new();
        inputs.insert("guidance".into(), serde_json::json!("hello"));

        let stream = EchoTool.invoke(&ctx, &inputs).await.unwrap();
        let envelopes: Vec<Envelope> = stream.collect().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EnvelopeKind::Text);
    }

    #[tokio::test]
    async fn missing_required_input_is_invalid() {
        let ctx = SessionContext::new("{}");
        let err = match EchoTool.invoke(&ctx, &ToolInputs::new()).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, ToolError::InvalidInputs(_)));
    }

    #[test]
    fn schema_serializes_with_type_field() {
        let schema = InputSchema::new().required("guidance", "string", "what to do");
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["guidance"]["type"], "string");
        assert_eq!(json["guidance"]["required"], true);
    }

    #[test]
    fn schema_iterates_in_name_order() {
        let schema = InputSchema::new()
            .required("zeta", "string", "")
            .required("alpha", "string", "");
        let names: Vec<&String> = schema.0.keys().collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
