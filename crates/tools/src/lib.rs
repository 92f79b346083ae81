//! Built-in tool capabilities for datascope.
//!
//! All tools implement `datascope_core::ToolCapability` and are registered
//! on branches through the orchestration engine. Each one plans its work
//! with a structured inference call, executes, and yields JSON-safe
//! envelopes.

pub mod chart;
pub mod compute;
pub mod email;
pub mod formatter;
pub mod sql;

pub use chart::{ChartPayload, ChartTool};
pub use compute::{ComputeTool, evaluate};
pub use email::{DeliveryStatus, DraftOnlyMailer, EmailDraft, EmailTool, Mailer};
pub use formatter::FormatterTool;
pub use sql::SqlTool;
