//! Append-only audit trail of agent activity, persisted as `Activity` memory
//! entries (the record serialized as JSON content).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::communication::{AgentCommunication, AgentHandoff, CommunicationType};
use crate::error::{PilotError, Result};
use crate::memory::{MemoryEntry, MemoryStore, MemoryType, Metadata};

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    MessageReceived,
    MessageSent,
    ToolInvoked,
    Handoff,
    StateChanged,
    Error,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::MessageReceived => "MessageReceived",
            ActivityType::MessageSent => "MessageSent",
            ActivityType::ToolInvoked => "ToolInvoked",
            ActivityType::Handoff => "Handoff",
            ActivityType::StateChanged => "StateChanged",
            ActivityType::Error => "Error",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    pub id: String,
    pub session_id: String,
    pub agent_name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl AgentActivity {
    pub fn new(
        session_id: impl Into<String>,
        agent_name: impl Into<String>,
        kind: ActivityType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_name: agent_name.into(),
            kind,
            description: description.into(),
            metadata: None,
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

pub struct ActivityLogger {
    store: Arc<dyn MemoryStore>,
    enabled: bool,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            enabled: true,
        }
    }

    /// A disabled logger accepts every call and records nothing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn log_activity(&self, activity: &AgentActivity) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = MemoryEntry::new(
            activity.session_id.clone(),
            MemoryType::Activity,
            serde_json::to_string(activity)?,
        )
        .with_id(activity.id.clone())
        .with_timestamp(activity.timestamp)
        .with_metadata("agent", activity.agent_name.clone())
        .with_metadata("activity_type", activity.kind.as_str());

        self.store.store(entry).await.map_err(PilotError::Memory)?;
        tracing::debug!(
            agent = %activity.agent_name,
            activity_type = %activity.kind,
            description = %activity.description,
            "agent activity"
        );
        Ok(())
    }

    pub async fn log_communication(&self, communication: &AgentCommunication) -> Result<()> {
        let activity = AgentActivity::new(
            communication.session_id.as_deref().unwrap_or(UNKNOWN),
            communication.from_agent.clone(),
            ActivityType::MessageSent,
            format!("Sent message to {}", communication.to_agent),
        )
        .with_metadata("to_agent", communication.to_agent.clone())
        .with_metadata("communication_type", communication.kind.as_str())
        .with_timestamp(communication.timestamp);
        self.log_activity(&activity).await
    }

    pub async fn log_handoff(&self, handoff: &AgentHandoff) -> Result<()> {
        let activity = AgentActivity::new(
            handoff.session_id.as_deref().unwrap_or(UNKNOWN),
            handoff.from_agent.clone(),
            ActivityType::Handoff,
            format!("Handed off to {}", handoff.to_agent),
        )
        .with_metadata("to_agent", handoff.to_agent.clone())
        .with_metadata("reason", handoff.reason.as_deref().unwrap_or("unspecified"))
        .with_timestamp(handoff.timestamp);
        self.log_activity(&activity).await
    }

    /// Entries that are not activity records (e.g. stored conversation
    /// messages) are skipped. Oldest first.
    pub async fn activities(&self, session_id: &str) -> Result<Vec<AgentActivity>> {
        let entries = self
            .store
            .get_by_session(session_id, MemoryType::Activity)
            .await
            .map_err(PilotError::Memory)?;

        let mut activities = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.metadata_str("activity_type").is_none() {
                continue;
            }
            activities.push(serde_json::from_str::<AgentActivity>(&entry.content)?);
        }
        activities.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(activities)
    }

    /// Sends and hand-offs only, oldest first.
    pub async fn communication_history(&self, session_id: &str) -> Result<Vec<AgentCommunication>> {
        let activities = self.activities(session_id).await?;
        Ok(activities
            .into_iter()
            .filter_map(|activity| {
                let kind = match activity.kind {
                    ActivityType::Handoff => CommunicationType::Handoff,
                    ActivityType::MessageSent => activity
                        .metadata_str("communication_type")
                        .and_then(CommunicationType::parse)
                        .unwrap_or(CommunicationType::Direct),
                    _ => return None,
                };
                Some(AgentCommunication {
                    to_agent: activity.metadata_str("to_agent").unwrap_or(UNKNOWN).to_string(),
                    from_agent: activity.agent_name,
                    message: None,
                    session_id: Some(activity.session_id),
                    kind,
                    timestamp: activity.timestamp,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn activities_come_back_oldest_first() {
        let logger = ActivityLogger::new(Arc::new(InMemoryStore::new()));
        let base = Utc::now();
        for (offset, description) in [(2, "third"), (0, "first"), (1, "second")] {
            logger
                .log_activity(
                    &AgentActivity::new("s1", "Planning", ActivityType::StateChanged, description)
                        .with_timestamp(base + Duration::seconds(offset)),
                )
                .await
                .expect("log should succeed");
        }

        let descriptions = logger
            .activities("s1")
            .await
            .expect("read should succeed")
            .into_iter()
            .map(|activity| activity.description)
            .collect::<Vec<_>>();
        assert_eq!(descriptions, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn communication_history_keeps_sends_and_handoffs() {
        let logger = ActivityLogger::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        logger
            .log_activity(&AgentActivity::new("s1", "Research", ActivityType::ToolInvoked, "search"))
            .await
            .expect("log should succeed");
        logger
            .log_communication(&AgentCommunication {
                from_agent: "Orchestrator".into(),
                to_agent: "Planning".into(),
                message: None,
                session_id: Some("s1".into()),
                kind: CommunicationType::Broadcast,
                timestamp: now,
            })
            .await
            .expect("log should succeed");
        logger
            .log_handoff(&AgentHandoff {
                from_agent: "Planning".into(),
                to_agent: "Reporting".into(),
                session_id: Some("s1".into()),
                reason: None,
                timestamp: now + Duration::seconds(1),
            })
            .await
            .expect("log should succeed");

        let history = logger
            .communication_history("s1")
            .await
            .expect("read should succeed");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, CommunicationType::Broadcast);
        assert_eq!(history[0].to_agent, "Planning");
        assert_eq!(history[1].kind, CommunicationType::Handoff);
        assert_eq!(history[1].from_agent, "Planning");
    }

    #[tokio::test]
    async fn disabled_logger_records_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let logger = ActivityLogger::new(store.clone()).with_enabled(false);
        logger
            .log_activity(&AgentActivity::new("s1", "Planning", ActivityType::Error, "boom"))
            .await
            .expect("log should succeed");
        assert!(store.is_empty().await);
    }
}
