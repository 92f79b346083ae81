//! The decision record — output of one decision-node invocation.
//!
//! Transient: consumed immediately by the engine, never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolInputs;

/// The kind of action a decision selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Navigate into a child branch.
    Branch,
    /// Invoke a tool in the current branch.
    Tool,
}

/// A structured decision returned by the inference backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether to navigate or to invoke.
    pub action: Action,

    /// Exact name of the chosen branch or tool.
    pub target: String,

    /// Guidance for the chosen branch or tool.
    #[serde(default)]
    pub guidance: String,

    /// Why this target was chosen over alternatives.
    #[serde(default)]
    pub reasoning: String,

    /// Input parameters for the chosen tool; ignored for branches.
    #[serde(default)]
    pub tool_inputs: ToolInputs,

    /// All work possible within this branch is done. Never honored on the
    /// root branch (it has no parent).
    #[serde(default)]
    pub return_to_parent: bool,

    /// The user's request has been answered; the step should end.
    #[serde(default)]
    pub end_actions: bool,
}

/// JSON schema for the decision record, handed to the inference backend as
/// the required reply shape.
pub fn decision_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["branch", "tool"],
                "description": "Whether to navigate to a child branch or execute a tool"
            },
            "target": {
                "type": "string",
                "description": "Exact name of the branch or tool — must match one of the available options"
            },
            "guidance": {
                "type": "string",
                "description": "Specific guidance for the chosen branch or tool: what should be accomplished and how"
            },
            "reasoning": {
                "type": "string",
                "description": "Why this branch or tool was chosen over the alternatives"
            },
            "tool_inputs": {
                "type": "object",
                "description": "Input parameters for the chosen tool per its input schema; empty object for branches"
            },
            "return_to_parent": {
                "type": "boolean",
                "description": "All work possible within this branch is done; must be false on the base branch"
            },
            "end_actions": {
                "type": "boolean",
                "description": "The user's request has been answered appropriately"
            }
        },
        "required": ["action", "target", "guidance", "reasoning", "return_to_parent", "end_actions"]
    })
}
