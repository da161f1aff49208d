//! Per-request conversation snapshot.
//!
//! `AgentContext` is never mutated in place. Every `with_*` call returns a new
//! copy, so fan-out branches and hand-off hops each hold their own value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{MemoryEntry, Metadata};
use crate::state::AgentState;

pub const HANDOFF_DEPTH_KEY: &str = "handoff_depth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: MessageRole,
    #[serde(default)]
    pub from_agent: Option<String>,
    #[serde(default)]
    pub to_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            role,
            from_agent: None,
            to_agent: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }

    pub fn from(mut self, agent: impl Into<String>) -> Self {
        self.from_agent = Some(agent.into());
        self
    }

    pub fn to(mut self, agent: impl Into<String>) -> Self {
        self.to_agent = Some(agent.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentContext {
    session_id: String,
    user_id: Option<String>,
    project_id: Option<String>,
    conversation_history: Vec<Message>,
    short_term_memory: Vec<MemoryEntry>,
    long_term_memory: Vec<MemoryEntry>,
    current_state: Option<AgentState>,
    properties: BTreeMap<String, Value>,
}

impl AgentContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Oldest first.
    pub fn conversation_history(&self) -> &[Message] {
        &self.conversation_history
    }

    pub fn short_term_memory(&self) -> &[MemoryEntry] {
        &self.short_term_memory
    }

    pub fn long_term_memory(&self) -> &[MemoryEntry] {
        &self.long_term_memory
    }

    pub fn current_state(&self) -> Option<&AgentState> {
        self.current_state.as_ref()
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Hand-off hops already taken in this chain. Absent or malformed means 0.
    pub fn handoff_depth(&self) -> u32 {
        self.properties
            .get(HANDOFF_DEPTH_KEY)
            .and_then(Value::as_u64)
            .and_then(|depth| u32::try_from(depth).ok())
            .unwrap_or(0)
    }

    pub fn with_user(&self, user_id: Option<String>) -> Self {
        Self {
            user_id,
            ..self.clone()
        }
    }

    pub fn with_project(&self, project_id: Option<String>) -> Self {
        Self {
            project_id,
            ..self.clone()
        }
    }

    pub fn with_history(&self, conversation_history: Vec<Message>) -> Self {
        Self {
            conversation_history,
            ..self.clone()
        }
    }

    pub fn with_message(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.conversation_history.push(message);
        next
    }

    pub fn with_short_term_memory(&self, entries: Vec<MemoryEntry>) -> Self {
        Self {
            short_term_memory: entries,
            ..self.clone()
        }
    }

    pub fn with_long_term_memory(&self, entries: Vec<MemoryEntry>) -> Self {
        Self {
            long_term_memory: entries,
            ..self.clone()
        }
    }

    pub fn with_state(&self, state: Option<AgentState>) -> Self {
        Self {
            current_state: state,
            ..self.clone()
        }
    }

    pub fn with_property(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.properties.insert(key.to_string(), value.into());
        next
    }

    pub fn with_handoff_depth(&self, depth: u32) -> Self {
        self.with_property(HANDOFF_DEPTH_KEY, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handoff_depth_defaults_to_zero() {
        let ctx = AgentContext::new("s1");
        assert_eq!(ctx.handoff_depth(), 0);

        let malformed = ctx.with_property(HANDOFF_DEPTH_KEY, "three");
        assert_eq!(malformed.handoff_depth(), 0);
    }

    #[test]
    fn with_methods_leave_original_untouched() {
        let original = AgentContext::new("s1").with_project(Some("p1".to_string()));
        let deeper = original.with_handoff_depth(2);
        let longer = original.with_message(Message::user("hello"));

        assert_eq!(original.handoff_depth(), 0);
        assert!(original.conversation_history().is_empty());
        assert_eq!(deeper.handoff_depth(), 2);
        assert_eq!(deeper.project_id(), Some("p1"));
        assert_eq!(longer.conversation_history().len(), 1);
    }

    #[test]
    fn message_role_serializes_lowercase() {
        let msg = Message::agent("done").from("Planning").to("Reporting");
        let json = serde_json::to_value(&msg).expect("message should serialize");
        assert_eq!(json["role"], "agent");
        assert_eq!(json["from_agent"], "Planning");
        assert_eq!(json["to_agent"], "Reporting");
    }
}
