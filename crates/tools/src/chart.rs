//! Chart tool — visualises data already present in the environment.
//!
//! The planner reads the memory trail (tables, computed values) and produces
//! bar or line chart payloads ready for client-side rendering. Without data
//! in the environment, chart generation will usually fail the task, which is
//! reflected in the tool description the decision node sees.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use datascope_core::envelope::{Envelope, EnvelopeKind};
use datascope_core::error::ToolError;
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::sanitize::to_json_value;
use datascope_core::session::SessionContext;
use datascope_core::tool::{
    EnvelopeStream, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const CHART_INSTRUCTION: &str = "\
You design charts over data already present in the session memory. Follow \
the guidance, reuse values from prior results verbatim, and produce multiple \
charts only when it genuinely suits the request. Each series must contain \
exactly one y-value per x-label.";

/// One planned chart, bar or line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartPayload {
    pub title: String,
    /// Labels for the x-axis.
    pub x_labels: Vec<Value>,
    /// Named series, each aligned with `x_labels`.
    pub y_series: BTreeMap<String, Vec<f64>>,
    pub x_axis_label: String,
    pub y_axis_label: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct ChartPlan {
    charts: Vec<ChartPayload>,
    overall_description: String,
}

fn chart_plan_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "charts": {
                "type": "array",
                "description": "Charts to render - create multiple only if it suits the user's needs",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "x_labels": {
                            "type": "array",
                            "description": "Labels for the x-axis"
                        },
                        "y_series": {
                            "type": "object",
                            "description": "Series name to list of y-values aligned with x_labels",
                            "additionalProperties": {
                                "type": "array",
                                "items": {"type": "number"}
                            }
                        },
                        "x_axis_label": {"type": "string"},
                        "y_axis_label": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["title", "x_labels", "y_series", "x_axis_label", "y_axis_label", "description"]
                }
            },
            "overall_description": {
                "type": "string",
                "description": "Overall description of the generated charts"
            }
        },
        "required": ["charts", "overall_description"]
    })
}

/// Supported chart kinds.
const CHART_TYPES: [&str; 2] = ["bar", "line"];

/// Visualise data from the session memory as bar or line charts.
pub struct ChartTool {
    backend: Arc<dyn InferenceBackend>,
}

impl ChartTool {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolCapability for ChartTool {
    fn name(&self) -> &str {
        "run_chart"
    }

    fn description(&self) -> &str {
        "Visualise data that exists in the environment - needs some data from \
         earlier steps to work with; picking it without data available will \
         usually fail the task"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .required(
                "chart_type",
                "string",
                "Type of chart to generate - only 'bar' or 'line'",
            )
            .required(
                "guidance",
                "string",
                "How the chart should be generated, including which prior data to include",
            )
    }

    async fn invoke(
        &self,
        ctx: &SessionContext,
        inputs: &ToolInputs,
    ) -> Result<EnvelopeStream, ToolError> {
        let chart_type = required_str(inputs, "chart_type")?;
        let guidance = required_str(inputs, "guidance")?;

        if !CHART_TYPES.contains(&chart_type) {
            return Err(ToolError::InvalidInputs(format!(
                "unsupported chart_type '{chart_type}' (expected 'bar' or 'line')"
            )));
        }

        let request = StructuredRequest {
            instruction: format!("{CHART_INSTRUCTION}\n\nChart type: {chart_type}"),
            context: PromptContext::from_session(ctx).with_guidance(guidance),
            output_schema: chart_plan_schema(),
            max_tokens: None,
        };
        let reply = self.backend.structured(request).await?;
        let plan: ChartPlan = serde_json::from_value(reply).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "run_chart".into(),
                reason: format!("planner returned an invalid chart plan: {e}"),
            }
        })?;

        for chart in &plan.charts {
            validate_series(chart).map_err(|reason| ToolError::ExecutionFailed {
                tool_name: "run_chart".into(),
                reason,
            })?;
        }

        let envelope = Envelope::new(EnvelopeKind::Chart, to_json_value(&plan.charts))
            .with_metadata("chart_type", Value::String(chart_type.to_string()))
            .with_metadata(
                "overall_description",
                Value::String(plan.overall_description.clone()),
            )
            .with_description(format!("{}.", plan.overall_description));

        Ok(envelope_stream(vec![envelope]))
    }
}

/// Every series must align with the x-axis labels.
fn validate_series(chart: &ChartPayload) -> Result<(), String> {
    if chart.x_labels.is_empty() {
        return Err(format!("chart '{}' has no x-axis labels", chart.title));
    }
    for (name, values) in &chart.y_series {
        if values.len() != chart.x_labels.len() {
            return Err(format!(
                "series '{}' in chart '{}' has {} values for {} labels",
                name,
                chart.title,
                values.len(),
                chart.x_labels.len()
            ));
        }
    }
    Ok(())
}
