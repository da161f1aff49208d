use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PilotError, Result};
use crate::memory::{MemoryEntry, MemoryStore, MemoryType};

/// Working state owned by a single agent within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    pub last_updated: DateTime<Utc>,
}

impl AgentState {
    pub fn new(session_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_name: agent_name.into(),
            data: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

pub fn state_key(session_id: &str, agent_name: &str) -> String {
    format!("state:{session_id}:{agent_name}")
}

pub struct AgentStateManager {
    store: Arc<dyn MemoryStore>,
}

impl AgentStateManager {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn get_state(&self, session_id: &str, agent_name: &str) -> Result<Option<AgentState>> {
        let entry = self
            .store
            .get(&state_key(session_id, agent_name))
            .await
            .map_err(PilotError::Memory)?;
        match entry {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.content)?)),
            None => Ok(None),
        }
    }

    /// Overwrites any previous state for the same session and agent.
    pub async fn save_state(&self, state: &AgentState) -> Result<()> {
        let mut state = state.clone();
        state.last_updated = Utc::now();
        let entry = MemoryEntry::new(
            state.session_id.clone(),
            MemoryType::AgentState,
            serde_json::to_string(&state)?,
        )
        .with_id(state_key(&state.session_id, &state.agent_name))
        .with_timestamp(state.last_updated)
        .with_metadata("agent", state.agent_name.clone());

        self.store.store(entry).await.map_err(PilotError::Memory)?;
        tracing::debug!(
            session_id = %state.session_id,
            agent = %state.agent_name,
            "saved agent state"
        );
        Ok(())
    }

    pub async fn clear_state(&self, session_id: &str) -> Result<()> {
        self.store
            .delete_by_session(session_id, MemoryType::AgentState)
            .await
            .map_err(PilotError::Memory)?;
        tracing::info!(session_id, "cleared agent state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn save_overwrites_and_clear_removes_all_agents() {
        let store = Arc::new(InMemoryStore::new());
        let manager = AgentStateManager::new(store.clone());

        manager
            .save_state(&AgentState::new("s1", "Planning").with_value("step", 1))
            .await
            .expect("save should succeed");
        manager
            .save_state(&AgentState::new("s1", "Planning").with_value("step", 2))
            .await
            .expect("save should succeed");
        manager
            .save_state(&AgentState::new("s1", "Research"))
            .await
            .expect("save should succeed");

        let planning = manager
            .get_state("s1", "Planning")
            .await
            .expect("get should succeed")
            .expect("state should exist");
        assert_eq!(planning.data.get("step"), Some(&Value::from(2)));

        let raw = store
            .get("state:s1:Planning")
            .await
            .expect("get should succeed")
            .expect("entry should exist under state key");
        assert_eq!(raw.kind, MemoryType::AgentState);

        manager.clear_state("s1").await.expect("clear should succeed");
        assert!(
            manager
                .get_state("s1", "Planning")
                .await
                .expect("get should succeed")
                .is_none()
        );
        assert!(
            manager
                .get_state("s1", "Research")
                .await
                .expect("get should succeed")
                .is_none()
        );
    }
}
