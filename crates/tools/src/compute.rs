//! Compute tool — plans an arithmetic expression from guidance and
//! evaluates it.
//!
//! The planner produces an expression plus named variable bindings (usually
//! lifted from prior results in the memory trail); evaluation happens in a
//! recursive-descent evaluator supporting `+`, `-`, `*`, `/`, parentheses,
//! unary negation, and identifiers. The result stays in the environment as
//! a non-frontend envelope for later steps (a chart, a formatted reply).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::{Envelope, EnvelopeKind};
use datascope_core::error::ToolError;
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::sanitize::json_float;
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str,
};
use serde::Deserialize;
use serde_json::Value;

const COMPUTE_INSTRUCTION: &str = "\
You plan one arithmetic computation that fulfills the guidance. Write a \
single expression over named variables using +, -, *, / and parentheses, and \
bind every variable to a concrete number taken from prior results or from \
the guidance itself. Compute only what is asked, nothing more. Name the \
output after the quantity it represents.";

/// Planner reply for one computation.
#[derive(Debug, Deserialize)]
struct ComputePlan {
    expression: String,
    #[serde(default)]
    variables: BTreeMap<String, f64>,
    output_name: String,
    purpose: String,
}

fn compute_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "expression": {
                "type": "string",
                "description": "Arithmetic expression over the bound variables, e.g. '(revenue - cogs) / revenue * 100'"
            },
            "variables": {
                "type": "object",
                "description": "Variable name to numeric value for every identifier in the expression",
                "additionalProperties": {"type": "number"}
            },
            "output_name": {
                "type": "string",
                "description": "Name of the computed quantity, e.g. 'gross_margin_pct'"
            },
            "purpose": {
                "type": "string",
                "description": "Short rationale of how this computation fulfills the guidance"
            }
        },
        "required": ["expression", "output_name", "purpose"]
    })
}

/// Plan and evaluate numeric computations over prior results.
pub struct ComputeTool {
    backend: Arc<dyn InferenceBackend>,
}

impl ComputeTool {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolCapability for ComputeTool {
    fn name(&self) -> &str {
        "run_compute"
    }

    fn description(&self) -> &str {
        "Compute a numeric value from guidance and prior results - basic \
         arithmetic over named variables, useful for margins, growth rates, \
         ratios and similar derived metrics"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().required("guidance", "string", "What to compute")
    }

    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        let guidance = required_str(inputs, "guidance")?;

        let request = StructuredRequest {
            instruction: COMPUTE_INSTRUCTION.into(),
            context: PromptContext::from_session(ctx).with_guidance(guidance),
            output_schema: compute_plan_schema(),
            max_tokens: None,
        };
        let reply = self.backend.structured(request).await?;
        let plan: ComputePlan = serde_json::from_value(reply).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "run_compute".into(),
                reason: format!("planner returned an invalid computation plan: {e}"),
            }
        })?;

        let result = evaluate(&plan.expression, &plan.variables).map_err(|reason| {
            ToolError::ExecutionFailed {
                tool_name: "run_compute".into(),
                reason,
            }
        })?;

        let mut data = serde_json::Map::new();
        data.insert(plan.output_name, json_float(result));
        let envelope = Envelope::new(EnvelopeKind::Computed, Value::Object(data))
            .internal()
            .with_metadata("expression", Value::String(plan.expression))
            .with_description(plan.purpose);

        Ok(envelope_stream(vec![envelope]))
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate an arithmetic expression with named variable bindings.
pub fn evaluate(expr: &str, variables: &BTreeMap<String, f64>) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        variables,
    };
    let result = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token at position {}: {:?}",
            parser.pos, parser.tokens[parser.pos]
        ));
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number: {num_str}"))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => return Err(format!("Unexpected character: '{c}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    variables: &'a BTreeMap<String, f64>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut value = self.parse_term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, String> {
        let mut value = self.parse_factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.pos += 1;
                    value *= self.parse_factor()?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let divisor = self.parse_factor()?;
                    if divisor == 0.0 {
                        return Err("Division by zero".into());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<f64, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::Ident(name)) => self
                .variables
                .get(name)
                .copied()
                .ok_or_else(|| format!("Unbound variable: {name}")),
            Some(Token::Minus) => Ok(-self.parse_factor()?),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            other => Err(format!("Unexpected token: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datascope_providers::MockBackend;
    use futures::StreamExt;

    fn vars(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn precedence_and_parentheses() {
        let empty = BTreeMap::new();
        assert_eq!(evaluate("2 + 3 * 4", &empty).unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4", &empty).unwrap(), 20.0);
        assert_eq!(evaluate("-4 + 6", &empty).unwrap(), 2.0);
    }

    #[test]
    fn variables_resolve_from_bindings() {
        let bindings = vars(&[("revenue", 100_000.0), ("cogs", 1_000.0)]);
        let margin = evaluate("(revenue - cogs) / revenue * 100", &bindings).unwrap();
        assert!((margin - 99.0).abs() < 1e-9);
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let err = evaluate("revenue - cogs", &vars(&[("revenue", 1.0)])).unwrap_err();
        assert!(err.contains("cogs"));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let empty = BTreeMap::new();
        assert!(evaluate("1 / 0", &empty).is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let empty = BTreeMap::new();
        assert!(evaluate("1 + 2 )", &empty).is_err());
        assert!(evaluate("", &empty).is_err());
    }

    #[tokio::test]
    async fn produces_an_internal_computed_envelope() {
        let backend = Arc::new(MockBackend::new());
        backend.push(serde_json::json!({
            "expression": "(revenue - cogs) / revenue * 100",
            "variables": {"revenue": 100000.0, "cogs": 1000.0},
            "output_name": "gross_margin_pct",
            "purpose": "Gross margin percentage from revenue and COGS"
        }));
        let tool = ComputeTool::new(backend);

        let ctx = SessionContext::new("{}");
        let mut inputs = ToolInputs::new();
        inputs.insert("guidance".into(), serde_json::json!("gross margin"));

        let stream = tool.invoke(&ctx, &inputs).await.unwrap();
        let envelopes: Vec<Envelope> = stream.collect().await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EnvelopeKind::Computed);
        assert!(!envelopes[0].frontend);
        let value = envelopes[0].data["gross_margin_pct"].as_f64().unwrap();
        assert!((value - 99.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn evaluation_failure_is_contained_as_tool_error() {
        let backend = Arc::new(MockBackend::new());
        backend.push(serde_json::json!({
            "expression": "a / b",
            "variables": {"a": 1.0},
            "output_name": "ratio",
            "purpose": "ratio"
        }));
        let tool = ComputeTool::new(backend);

        let ctx = SessionContext::new("{}");
        let mut inputs = ToolInputs::new();
        inputs.insert("guidance".into(), serde_json::json!("ratio"));

        let err = match tool.invoke(&ctx, &inputs).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
