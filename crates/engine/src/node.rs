//! The per-branch decision node.
//!
//! Holds the branch's registered tool options and child-branch options, and
//! exposes one operation: issue a structured inference call and return a
//! decision record. Option tables are mutated only by the orchestrator
//! between runs, never concurrently with an in-flight decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use datascope_core::decision::{Decision, decision_schema};
use datascope_core::error::{DecisionError, RegistryError};
use datascope_core::inference::{InferenceBackend, PromptContext, StructuredRequest};
use datascope_core::session::SessionContext;
use datascope_core::tool::{InputSchema, ToolCapability};
use serde_json::Value;
use tracing::debug;

/// The orchestrator role prompt shared by every decision node.
const DECISION_INSTRUCTION: &str = "\
You are the orchestrator for a data analysis workflow. You decompose the \
user's request into incremental steps and route each step to one tool or one \
specialized branch, keeping state across steps until the task is done.

Operating loop:
- Analyze the request, the domain context, prior results in memory, the \
conversation, and recorded failures. Identify what blocks progress.
- Plan the smallest next step that moves the task forward; avoid batching. \
Large multi-table questions should be broken into several small queries \
rather than answered in one shot.
- Give the chosen tool or branch concise, precise guidance. If a step should \
build on an earlier result, say so explicitly: tools only see the shared \
context plus your guidance.
- Intermediate results stream to the user as they are produced, so state in \
your guidance how each result is best presented (table, chart, or text), and \
use the formatting tool when the user needs a polished reply.
- Set end_actions once the user's request has been answered appropriately.";

/// A registered tool option: the capability plus what the decision sees.
#[derive(Clone)]
pub struct ToolOption {
    pub capability: Arc<dyn ToolCapability>,
    pub description: String,
    pub schema: InputSchema,
}

/// One decision node, owned by its branch.
pub struct DecisionNode {
    branch_id: String,
    instruction: String,
    tools: BTreeMap<String, ToolOption>,
    branches: BTreeMap<String, String>,
}

impl DecisionNode {
    pub fn new(branch_id: &str, instruction: &str) -> Self {
        Self {
            branch_id: branch_id.to_string(),
            instruction: instruction.to_string(),
            tools: BTreeMap::new(),
            branches: BTreeMap::new(),
        }
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Register a tool option. Fails if the name exists in this branch.
    pub fn add_tool_option(
        &mut self,
        capability: Arc<dyn ToolCapability>,
    ) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool {
                branch: self.branch_id.clone(),
                tool: name,
            });
        }
        let option = ToolOption {
            description: capability.description().to_string(),
            schema: capability.input_schema(),
            capability,
        };
        self.tools.insert(name, option);
        Ok(())
    }

    /// Register a child branch option. Fails if the id is already present.
    pub fn add_branch_option(
        &mut self,
        branch_id: &str,
        description: &str,
    ) -> Result<(), RegistryError> {
        if self.branches.contains_key(branch_id) {
            return Err(RegistryError::DuplicateBranch(branch_id.to_string()));
        }
        self.branches
            .insert(branch_id.to_string(), description.to_string());
        Ok(())
    }

    /// Detach a child branch option (no-op when absent).
    pub fn remove_branch_option(&mut self, branch_id: &str) {
        self.branches.remove(branch_id);
    }

    pub fn tool_option(&self, name: &str) -> Option<&ToolOption> {
        self.tools.get(name)
    }

    pub fn has_branch_option(&self, branch_id: &str) -> bool {
        self.branches.contains_key(branch_id)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// `{tool_name: {description, inputs}}` for the decision prompt.
    pub fn tools_for_prompt(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, option) in &self.tools {
            map.insert(
                name.clone(),
                serde_json::json!({
                    "description": option.description,
                    "inputs": option.schema,
                }),
            );
        }
        Value::Object(map)
    }

    /// `{branch_id: description}` for the decision prompt.
    pub fn branches_for_prompt(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (id, description) in &self.branches {
            map.insert(id.clone(), Value::String(description.clone()));
        }
        Value::Object(map)
    }

    /// Issue one structured inference call and parse the decision record.
    ///
    /// A reply that does not parse as a decision record is a decision
    /// failure; a well-formed decision naming an unknown target is the
    /// orchestrator's routing-failure case, not ours.
    pub async fn decide(
        &self,
        ctx: &SessionContext,
        backend: &dyn InferenceBackend,
    ) -> Result<Decision, DecisionError> {
        let context = PromptContext::from_session(ctx)
            .with_tools(self.tools_for_prompt())
            .with_branches(self.branches_for_prompt());

        let request = StructuredRequest {
            instruction: format!(
                "{DECISION_INSTRUCTION}\n\nBranch instruction: {}",
                self.instruction
            ),
            context,
            output_schema: decision_schema(),
            max_tokens: None,
        };

        let reply = backend.structured(request).await?;
        let decision: Decision = serde_json::from_value(reply)
            .map_err(|e| DecisionError::Malformed(e.to_string()))?;

        debug!(
            branch = %self.branch_id,
            action = ?decision.action,
            target = %decision.target,
            "Decision taken"
        );
        Ok(decision)
    }
}
