use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLogger;
use crate::agents::AgentResponse;
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicationType {
    Direct,
    Broadcast,
    Handoff,
}

impl CommunicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommunicationType::Direct => "Direct",
            CommunicationType::Broadcast => "Broadcast",
            CommunicationType::Handoff => "Handoff",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Direct" => Some(CommunicationType::Direct),
            "Broadcast" => Some(CommunicationType::Broadcast),
            "Handoff" => Some(CommunicationType::Handoff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCommunication {
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CommunicationType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHandoff {
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Agent-to-agent messaging. Every send, broadcast and hand-off is recorded
/// through the activity logger.
pub struct CommunicationService {
    registry: Arc<AgentRegistry>,
    activity: Arc<ActivityLogger>,
}

impl CommunicationService {
    pub fn new(registry: Arc<AgentRegistry>, activity: Arc<ActivityLogger>) -> Self {
        Self { registry, activity }
    }

    /// Logs the send, then runs `to_agent` on the message.
    pub async fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        tracing::info!(from = from_agent, to = to_agent, "sending agent message");
        let target = self
            .registry
            .by_name(to_agent)
            .ok_or_else(|| PilotError::Communication(format!("agent '{to_agent}' not found")))?;

        self.activity
            .log_communication(&AgentCommunication {
                from_agent: from_agent.to_string(),
                to_agent: to_agent.to_string(),
                message: Some(message.clone()),
                session_id: Some(context.session_id().to_string()),
                kind: CommunicationType::Direct,
                timestamp: Utc::now(),
            })
            .await?;

        target.process(message, context, cancel).await
    }

    /// Records a broadcast entry for every other registered agent. Recipients
    /// are not invoked. Returns the number of entries written.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        message: &Message,
        context: &AgentContext,
    ) -> Result<usize> {
        tracing::info!(from = from_agent, "broadcasting message to all agents");
        let recipients = self
            .registry
            .all()
            .into_iter()
            .filter(|agent| agent.name() != from_agent)
            .collect::<Vec<_>>();

        for agent in &recipients {
            self.activity
                .log_communication(&AgentCommunication {
                    from_agent: from_agent.to_string(),
                    to_agent: agent.name().to_string(),
                    message: Some(message.clone()),
                    session_id: Some(context.session_id().to_string()),
                    kind: CommunicationType::Broadcast,
                    timestamp: Utc::now(),
                })
                .await?;
        }
        Ok(recipients.len())
    }

    pub async fn log_handoff(
        &self,
        from_agent: &str,
        to_agent: &str,
        context: &AgentContext,
        reason: Option<&str>,
    ) -> Result<()> {
        self.activity
            .log_handoff(&AgentHandoff {
                from_agent: from_agent.to_string(),
                to_agent: to_agent.to_string(),
                session_id: Some(context.session_id().to_string()),
                reason: reason.map(str::to_string),
                timestamp: Utc::now(),
            })
            .await
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<AgentCommunication>> {
        self.activity.communication_history(session_id).await
    }
}
