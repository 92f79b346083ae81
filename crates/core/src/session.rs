//! Session context — the single mutable record threaded through one
//! conversation.
//!
//! Holds the current user request, the transcript, the accumulated memory
//! trail and failure log, and the static domain context. Owned exclusively
//! by one conversation's engine instance; never shared across conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvelopeKind};

/// The role of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One `{role, content}` transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One immutable entry in the memory trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Strictly increasing, contiguous, starting at 1.
    pub sequence: u64,
    /// The tool that produced this result.
    pub producer: String,
    /// Human-readable summary carried over from the envelope.
    pub description: String,
    /// The envelope payload.
    pub data: serde_json::Value,
    /// The envelope kind.
    pub kind: EnvelopeKind,
}

/// Ordered append-only log of every tool execution result.
///
/// The rendered digest is what future decisions see as "what has already
/// happened", so rendering must be a pure, order-preserving function of the
/// entries: re-rendering with an unchanged trail is byte-identical.
#[derive(Debug, Clone)]
pub struct MemoryTrail {
    entries: Vec<MemoryEntry>,
    next_sequence: u64,
}

impl Default for MemoryTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTrail {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Assign the next sequence number and append an entry for `envelope`.
    pub fn append(&mut self, producer: &str, envelope: &Envelope) {
        self.entries.push(MemoryEntry {
            sequence: self.next_sequence,
            producer: producer.to_string(),
            description: envelope.description.clone().unwrap_or_default(),
            data: envelope.data.clone(),
            kind: envelope.kind,
        });
        self.next_sequence += 1;
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first textual digest fed into every decision and tool call.
    pub fn render_for_prompt(&self) -> String {
        if self.entries.is_empty() {
            return "No previous actions taken.".to_string();
        }
        let mut rendered = String::new();
        for entry in &self.entries {
            rendered.push_str(&format!(
                "{}: {}\nDescription: {}\nResult: {}\n\n",
                entry.sequence, entry.producer, entry.description, entry.data
            ));
        }
        rendered
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub producer: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only log of failures, fed back to bias future decisions away
/// from repeating them.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    entries: Vec<FailureEntry>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, producer: &str, message: &str) {
        self.entries.push(FailureEntry {
            producer: producer.to_string(),
            message: message.to_string(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first digest of recorded failures.
    pub fn render_for_prompt(&self) -> String {
        if self.entries.is_empty() {
            return "No previous failures recorded.".to_string();
        }
        let mut rendered = String::new();
        for entry in &self.entries {
            rendered.push_str(&format!(
                "Failed agent: {}\nError: {}\nTimestamp: {}\n\n",
                entry.producer,
                entry.message,
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        rendered
    }
}

/// The mutable session record for one conversation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The request currently being processed.
    pub user_request: String,
    /// Full conversation transcript.
    pub transcript: Vec<ChatMessage>,
    /// Static domain context (DB schema, metric definitions, ...).
    domain_context: String,
    /// Ordered log of tool execution results.
    pub memory: MemoryTrail,
    /// Recorded failures.
    pub failures: FailureLog,
    /// Number of decisions taken across the conversation.
    pub step_count: u64,
}

impl SessionContext {
    /// Create a fresh context with the immutable domain context blob.
    pub fn new(domain_context: impl Into<String>) -> Self {
        Self {
            user_request: String::new(),
            transcript: Vec::new(),
            domain_context: domain_context.into(),
            memory: MemoryTrail::new(),
            failures: FailureLog::new(),
            step_count: 0,
        }
    }

    /// Start a new conversation step: record the request and transcript it.
    pub fn begin_request(&mut self, request: &str) {
        self.user_request = request.to_string();
        self.transcript.push(ChatMessage::user(request));
    }

    pub fn domain_context(&self) -> &str {
        &self.domain_context
    }
}
