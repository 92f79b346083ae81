//! Structured inference backends for datascope.
//!
//! All backends implement `datascope_core::InferenceBackend`: one structured
//! call in, one schema-conforming JSON value out.

pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicBackend;
pub use mock::MockBackend;
