//! Error types for the datascope domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all datascope operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Inference errors ---
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the orchestration run loop itself. Everything in here is
/// terminal for the current conversation step; recoverable conditions
/// (tool failures, single routing misses) never surface as `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Decision failed in branch '{branch}': {source}")]
    Decision {
        branch: String,
        #[source]
        source: DecisionError,
    },

    #[error("Routing failed {attempts} consecutive times in branch '{branch}', last target '{target}'")]
    RoutingExhausted {
        branch: String,
        target: String,
        attempts: u32,
    },

    #[error("Step limit of {limit} reached")]
    StepLimit { limit: u64 },

    #[error("Conversation was cancelled by the transport")]
    Cancelled,

    #[error("Active branch '{0}' has no decision node")]
    UnknownBranch(String),
}

/// Structural violations on engine configuration. These are programmer
/// errors: fail fast at call time, never silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Branch '{0}' already exists")]
    DuplicateBranch(String),

    #[error("Tool '{tool}' already registered in branch '{branch}'")]
    DuplicateTool { branch: String, tool: String },

    #[error("Branch '{0}' does not exist")]
    UnknownBranch(String),

    #[error("The root branch cannot be {0}")]
    ReservedRoot(&'static str),

    #[error("Branch depth limit of {limit} exceeded under parent '{parent}'")]
    DepthExceeded { parent: String, limit: usize },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid tool inputs: {0}")]
    InvalidInputs(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Inference failed inside tool: {0}")]
    Inference(#[from] InferenceError),

    #[error("Database error: {0}")]
    Database(String),
}

/// Failures of the structured inference call (timeout, transport,
/// malformed structured output).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed structured output: {0}")]
    Malformed(String),
}

/// A decision-node invocation failure: either the inference call itself
/// failed, or its reply did not parse as a decision record.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Decision did not match the expected record shape: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_displays_correctly() {
        let err = Error::Registry(RegistryError::DuplicateTool {
            branch: "base".into(),
            tool: "run_sql".into(),
        });
        assert!(err.to_string().contains("run_sql"));
        assert!(err.to_string().contains("base"));
    }

    #[test]
    fn engine_error_displays_attempts() {
        let err = EngineError::RoutingExhausted {
            branch: "base".into(),
            target: "missing_tool".into(),
            attempts: 3,
        };
        assert!(err.to_string().contains("3 consecutive"));
        assert!(err.to_string().contains("missing_tool"));
    }

    #[test]
    fn decision_error_wraps_inference() {
        let err = DecisionError::from(InferenceError::Timeout("30s elapsed".into()));
        assert!(err.to_string().contains("30s"));
    }
}
