//! SQL tool — plans a read-only query from natural-language guidance and
//! executes it against Postgres.
//!
//! The generated statement is validated before execution: a single
//! SELECT/WITH statement, no mutation keywords. Result rows are converted
//! column-by-column into JSON-safe values; a column whose type cannot be
//! decoded is dropped to `null` rather than failing the whole table.

use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::{Envelope, EnvelopeKind};
use datascope_core::error::ToolError;
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::sanitize::{
    json_bytes, json_date, json_float, json_naive_datetime, json_timestamp,
};
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, warn};

const SQL_INSTRUCTION: &str = "\
You generate one read-only SQL query from the orchestrator's guidance, using \
the database schema in the domain context. Produce a single SELECT (or WITH) \
statement — never INSERT, UPDATE, DELETE, or DDL. Cast numeric and decimal \
expressions to double precision so the values serialize cleanly. Describe \
the expected columns and state briefly what the query accomplishes and why \
it answers the guidance.";

/// Planner reply for one SQL step.
#[derive(Debug, Deserialize)]
struct SqlPlan {
    sql_query: String,
    #[serde(default)]
    expected_columns: Vec<String>,
    #[serde(default)]
    column_descriptions: serde_json::Map<String, Value>,
    query_purpose: String,
}

fn sql_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sql_query": {
                "type": "string",
                "description": "The SQL statement to execute (SELECT only)"
            },
            "expected_columns": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Expected column names in the result"
            },
            "column_descriptions": {
                "type": "object",
                "description": "What each column represents"
            },
            "query_purpose": {
                "type": "string",
                "description": "What this query accomplishes and why it answers the guidance"
            }
        },
        "required": ["sql_query", "query_purpose"]
    })
}

/// Generate and execute SQL queries from natural-language guidance.
pub struct SqlTool {
    backend: Arc<dyn InferenceBackend>,
    pool: PgPool,
}

impl SqlTool {
    pub fn new(backend: Arc<dyn InferenceBackend>, pool: PgPool) -> Self {
        Self { backend, pool }
    }

    /// Connect a read-only pool and build the tool.
    pub async fn connect(
        backend: Arc<dyn InferenceBackend>,
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, ToolError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| ToolError::Database(e.to_string()))?;
        Ok(Self::new(backend, pool))
    }
}

#[async_trait]
impl ToolCapability for SqlTool {
    fn name(&self) -> &str {
        "run_sql"
    }

    fn description(&self) -> &str {
        "Generate and execute SQL queries based on natural language guidance"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().required(
            "guidance",
            "string",
            "What you want to calculate or retrieve from the database",
        )
    }

    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        let guidance = required_str(inputs, "guidance")?;

        let request = StructuredRequest {
            instruction: SQL_INSTRUCTION.into(),
            context: PromptContext::from_session(ctx).with_guidance(guidance),
            output_schema: sql_plan_schema(),
            max_tokens: None,
        };
        let reply = self.backend.structured(request).await?;
        let plan: SqlPlan = serde_json::from_value(reply).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "run_sql".into(),
                reason: format!("planner returned an invalid SQL plan: {e}"),
            }
        })?;

        validate_read_only(&plan.sql_query).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "run_sql".into(),
            reason,
        })?;

        debug!(query = %plan.sql_query, "Executing planned SQL");
        let rows = sqlx::query(&plan.sql_query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ToolError::Database(e.to_string()))?;

        let headers: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_else(|| plan.expected_columns.clone());
        let data: Vec<Value> = rows.iter().map(row_to_json).collect();
        let row_count = data.len();

        let envelope = Envelope::new(EnvelopeKind::Table, Value::Array(data))
            .with_metadata("query", Value::String(plan.sql_query))
            .with_metadata("headers", serde_json::json!(headers))
            .with_metadata(
                "column_descriptions",
                Value::Object(plan.column_descriptions),
            )
            .with_metadata("row_count", serde_json::json!(row_count))
            .with_metadata("query_purpose", Value::String(plan.query_purpose.clone()))
            .with_description(format!("{}.", plan.query_purpose));

        Ok(envelope_stream(vec![envelope]))
    }
}

/// Reject anything that is not a single read-only statement.
fn validate_read_only(sql: &str) -> Result<(), String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err("planner produced an empty statement".into());
    }
    if trimmed.contains(';') {
        return Err("only a single statement is allowed".into());
    }

    let upper = trimmed.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err("only SELECT queries are allowed".into());
    }

    const FORBIDDEN: [&str; 10] = [
        "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
        "COPY",
    ];
    for token in upper.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if FORBIDDEN.contains(&token) {
            return Err(format!("statement contains forbidden keyword {token}"));
        }
    }
    Ok(())
}

/// Convert one row into a JSON object, sanitizing per column type.
fn row_to_json(row: &PgRow) -> Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let value = decode_column(row, idx, column.type_info().name());
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::Bool))),
        "INT2" => opt(row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(Value::from))),
        "INT4" => opt(row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| v.map(Value::from))),
        "INT8" => opt(row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(Value::from))),
        "FLOAT4" => opt(row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|n| json_float(f64::from(n))))),
        "FLOAT8" => opt(row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| v.map(json_float))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => opt(row
            .try_get::<Option<String>, _>(idx)
            .map(|v| v.map(Value::String))),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|ts| json_timestamp(&ts)))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|ts| json_naive_datetime(&ts)))),
        "DATE" => opt(row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| json_date(&d)))),
        "BYTEA" => opt(row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| json_bytes(&b)))),
        "JSON" | "JSONB" => opt(row.try_get::<Option<Value>, _>(idx)),
        other => {
            // Last resort: textual decode; otherwise the field is dropped.
            match row.try_get::<Option<String>, _>(idx) {
                Ok(Some(s)) => Value::String(s),
                Ok(None) => Value::Null,
                Err(_) => {
                    warn!(column_type = other, "Dropping undecodable column value");
                    Value::Null
                }
            }
        }
    }
}

fn opt(result: Result<Option<Value>, sqlx::Error>) -> Value {
    match result {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(e) => {
            warn!("Dropping column value that failed to decode: {e}");
            Value::Null
        }
    }
}
