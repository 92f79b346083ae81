//! The conversation registry — explicit lifecycle for engine instances.
//!
//! Maps conversation id → exclusively-owned engine instance. Create, lookup,
//! and delete are serialized through this service; engine instances never
//! touch each other's state, so no cross-conversation locking exists beyond
//! the registry map itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use datascope_core::session::{ChatMessage, MemoryEntry, Role};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::engine::Orchestrator;

/// Builds a fully wired engine for a new conversation id.
pub type EngineFactory = Arc<dyn Fn(&str) -> Orchestrator + Send + Sync>;

/// One registered conversation.
pub struct ConversationHandle {
    pub id: String,
    /// The engine, locked for the duration of each run so exactly one
    /// decision or tool call is in flight per conversation.
    pub engine: Mutex<Orchestrator>,
    pub created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl ConversationHandle {
    fn new(id: String, engine: Orchestrator) -> Self {
        let now = Utc::now();
        Self {
            id,
            engine: Mutex::new(engine),
            created_at: now,
            last_activity: RwLock::new(now),
        }
    }

    /// Record activity on this conversation.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().await
    }
}

/// Summary metadata for conversation listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// First user message, used for title generation.
    pub first_message: Option<String>,
    /// Transcript entries plus memory trail entries.
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
}

/// The registry service.
pub struct ConversationRegistry {
    factory: EngineFactory,
    conversations: RwLock<HashMap<String, Arc<ConversationHandle>>>,
}

impl ConversationRegistry {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Create a fresh conversation with a generated id.
    pub async fn create(&self) -> Arc<ConversationHandle> {
        let id = Uuid::new_v4().to_string();
        self.get_or_create(&id).await
    }

    /// Resume an existing conversation, or create one under this id.
    pub async fn get_or_create(&self, id: &str) -> Arc<ConversationHandle> {
        let mut conversations = self.conversations.write().await;
        if let Some(handle) = conversations.get(id) {
            return handle.clone();
        }
        info!(conversation_id = id, "Creating conversation");
        let handle = Arc::new(ConversationHandle::new(
            id.to_string(),
            (self.factory)(id),
        ));
        conversations.insert(id.to_string(), handle.clone());
        handle
    }

    /// Look up an existing conversation.
    pub async fn get(&self, id: &str) -> Option<Arc<ConversationHandle>> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Delete a conversation, dropping its engine instance.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.conversations.write().await.remove(id).is_some();
        if removed {
            info!(conversation_id = id, "Removed conversation");
        }
        removed
    }

    /// Fetch the ordered memory trail for a conversation.
    pub async fn memory_trail(&self, id: &str) -> Option<Vec<MemoryEntry>> {
        let handle = self.get(id).await?;
        let engine = handle.engine.lock().await;
        Some(engine.memory_trail().to_vec())
    }

    /// Fetch the transcript for a conversation.
    pub async fn transcript(&self, id: &str) -> Option<Vec<ChatMessage>> {
        let handle = self.get(id).await?;
        let engine = handle.engine.lock().await;
        Some(engine.context().transcript.clone())
    }

    /// Summaries of all conversations, most recently active first.
    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        let handles: Vec<Arc<ConversationHandle>> =
            self.conversations.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let last_activity = handle.last_activity().await;
            let engine = handle.engine.lock().await;
            let context = engine.context();
            let first_message = context
                .transcript
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone());
            summaries.push(ConversationSummary {
                id: handle.id.clone(),
                created_at: handle.created_at,
                first_message,
                message_count: context.transcript.len() + context.memory.len(),
                last_activity,
            });
        }
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }
}
