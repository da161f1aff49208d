use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::memory::{MemoryEntry, MemoryStore, MemoryType};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
const LONG_TERM_LIMIT: usize = 5;
const MESSAGE_TYPE_KEY: &str = "message_type";
const CONVERSATION: &str = "conversation";

/// Identity and properties of one incoming request.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub properties: BTreeMap<String, Value>,
}

impl ContextRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Builds per-request contexts from stored conversation and memory.
///
/// Conversation messages are kept as `Activity` entries tagged
/// `message_type = conversation` in the short-term store; the long-term store
/// is searched with the latest message.
pub struct ContextManager {
    short_term: Arc<dyn MemoryStore>,
    long_term: Arc<dyn MemoryStore>,
    history_limit: usize,
}

impl ContextManager {
    pub fn new(short_term: Arc<dyn MemoryStore>, long_term: Arc<dyn MemoryStore>) -> Self {
        Self {
            short_term,
            long_term,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub async fn load_context(&self, request: &ContextRequest) -> Result<AgentContext> {
        let conversation = self
            .conversation_entries(&request.session_id, self.history_limit)
            .await?;
        let history = decode_messages(&conversation)?;

        let long_term = match history.last() {
            Some(last) => self
                .long_term
                .search(&last.content, request.project_id.as_deref(), LONG_TERM_LIMIT)
                .await
                .map_err(PilotError::Memory)?,
            None => Vec::new(),
        };

        tracing::debug!(
            session_id = %request.session_id,
            history = history.len(),
            long_term = long_term.len(),
            "loaded conversation context"
        );

        let mut context = AgentContext::new(request.session_id.clone())
            .with_user(request.user_id.clone())
            .with_project(request.project_id.clone())
            .with_history(history)
            .with_short_term_memory(conversation)
            .with_long_term_memory(long_term);
        for (key, value) in &request.properties {
            context = context.with_property(key, value.clone());
        }
        Ok(context)
    }

    pub async fn record_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let entry = MemoryEntry::new(
            session_id,
            MemoryType::Activity,
            serde_json::to_string(message)?,
        )
        .with_id(format!("{session_id}:message:{}", message.id))
        .with_timestamp(message.timestamp)
        .with_metadata(MESSAGE_TYPE_KEY, CONVERSATION)
        .with_metadata("role", message.role.as_str());
        self.short_term.store(entry).await.map_err(PilotError::Memory)
    }

    /// The newest `limit` conversation messages, oldest first.
    pub async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let entries = self.conversation_entries(session_id, limit).await?;
        decode_messages(&entries)
    }

    /// Newest `limit` conversation entries, returned oldest first.
    async fn conversation_entries(&self, session_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries = self
            .short_term
            .get_by_session(session_id, MemoryType::Activity)
            .await
            .map_err(PilotError::Memory)?
            .into_iter()
            .filter(|entry| entry.metadata_str(MESSAGE_TYPE_KEY) == Some(CONVERSATION))
            .take(limit)
            .collect::<Vec<_>>();
        entries.reverse();
        Ok(entries)
    }
}

fn decode_messages(entries: &[MemoryEntry]) -> Result<Vec<Message>> {
    entries
        .iter()
        .map(|entry| serde_json::from_str::<Message>(&entry.content).map_err(PilotError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::memory::InMemoryStore;

    fn message_at(content: &str, offset: i64) -> Message {
        let mut message = Message::user(content);
        message.timestamp = Utc::now() + Duration::seconds(offset);
        message
    }

    #[tokio::test]
    async fn recent_messages_are_windowed_and_chronological() {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(store.clone(), store.clone());
        for i in 0..4 {
            manager
                .record_message("s1", &message_at(&format!("m{i}"), i))
                .await
                .expect("record should succeed");
        }

        let recent = manager
            .recent_messages("s1", 3)
            .await
            .expect("read should succeed")
            .into_iter()
            .map(|message| message.content)
            .collect::<Vec<_>>();
        assert_eq!(recent, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn load_context_pulls_history_and_related_long_term_memory() {
        let short_term = Arc::new(InMemoryStore::new());
        let long_term = Arc::new(InMemoryStore::new());
        long_term
            .store(
                MemoryEntry::new("old", MemoryType::Plan, "Plan for the billing migration")
                    .with_project(Some("p1".to_string())),
            )
            .await
            .expect("store should succeed");
        let manager = ContextManager::new(short_term, long_term).with_history_limit(2);
        manager
            .record_message("s1", &message_at("hello", 0))
            .await
            .expect("record should succeed");
        manager
            .record_message("s1", &message_at("billing migration", 1))
            .await
            .expect("record should succeed");

        let request = ContextRequest::new("s1").with_project(Some("p1".to_string()));
        let context = manager.load_context(&request).await.expect("load should succeed");

        assert_eq!(context.conversation_history().len(), 2);
        assert_eq!(context.conversation_history()[1].content, "billing migration");
        assert_eq!(context.short_term_memory().len(), 2);
        assert_eq!(context.long_term_memory().len(), 1);
        assert_eq!(context.project_id(), Some("p1"));
        assert_eq!(context.handoff_depth(), 0);
    }

    #[tokio::test]
    async fn empty_session_loads_empty_context() {
        let store = Arc::new(InMemoryStore::new());
        let manager = ContextManager::new(store.clone(), store);
        let context = manager
            .load_context(&ContextRequest::new("fresh"))
            .await
            .expect("load should succeed");
        assert!(context.conversation_history().is_empty());
        assert!(context.long_term_memory().is_empty());
    }
}
