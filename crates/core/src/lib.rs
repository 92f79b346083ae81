//! # datascope core
//!
//! Domain types, traits, and error definitions for the datascope analytical
//! orchestration runtime. This crate defines the contracts everything else
//! implements against: the response envelope, the session context with its
//! memory trail and failure log, the tool capability contract, the decision
//! record, and the structured inference boundary.
//!
//! Implementations live in their respective crates; all crates depend inward
//! on core.

pub mod decision;
pub mod envelope;
pub mod error;
pub mod inference;
pub mod sanitize;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use decision::{Action, Decision, decision_schema};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{
    DecisionError, EngineError, Error, InferenceError, RegistryError, Result, ToolError,
};
pub use inference::{InferenceBackend, PromptContext, StructuredRequest};
pub use session::{ChatMessage, FailureEntry, FailureLog, MemoryEntry, MemoryTrail, Role, SessionContext};
pub use tool::{EnvelopeStream, InputField, InputSchema, ToolCapability, ToolInputs, envelope_stream, required_str};
