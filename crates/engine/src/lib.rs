//! # datascope engine
//!
//! The orchestration core: a hierarchical branch/decision-node state machine
//! that routes each step of an analytical conversation to a tool or a
//! specialized branch, streams result envelopes in order, and feeds an
//! accumulated memory trail and failure log back into every decision.
//!
//! The engine is single-threaded cooperative per conversation: exactly one
//! decision call or tool invocation is in flight for a session context at a
//! time. Across conversations, independent instances run concurrently with
//! no shared state; the [`ConversationRegistry`] serializes create, lookup,
//! and delete.

pub mod branch;
pub mod conversations;
pub mod engine;
pub mod node;

pub use branch::{BASE_BRANCH, BranchArena, BranchDefinition, MAX_BRANCH_DEPTH};
pub use conversations::{
    ConversationHandle, ConversationRegistry, ConversationSummary, EngineFactory,
};
pub use engine::{DEFAULT_MAX_STEPS, DEFAULT_ROUTING_RETRY_LIMIT, Orchestrator};
pub use node::{DecisionNode, ToolOption};
