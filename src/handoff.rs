use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agents::AgentResponse;
use crate::communication::CommunicationService;
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::registry::AgentRegistry;

pub const MAX_HANDOFF_DEPTH: u32 = 5;

/// Follows hand-off requests from agent to agent.
///
/// The chain depth lives in the context property bag and every hop works on a
/// fresh copy of the context. Reaching the depth cap or naming an unknown
/// target ends the chain with the last response, not an error.
pub struct HandoffManager {
    registry: Arc<AgentRegistry>,
    communication: Arc<CommunicationService>,
    max_depth: u32,
}

impl HandoffManager {
    pub fn new(registry: Arc<AgentRegistry>, communication: Arc<CommunicationService>) -> Self {
        Self {
            registry,
            communication,
            max_depth: MAX_HANDOFF_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn should_handoff(&self, response: &AgentResponse) -> bool {
        response.handoff_target().is_some()
    }

    pub async fn execute_handoff(
        &self,
        source: AgentResponse,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let mut response = source;
        let mut context = context.clone();

        loop {
            let Some(target_name) = response.handoff_target().map(str::to_string) else {
                return Ok(response);
            };

            let depth = context.handoff_depth();
            if depth >= self.max_depth {
                tracing::warn!(
                    max_depth = self.max_depth,
                    from = %response.from_agent,
                    to = %target_name,
                    "max handoff depth reached, terminating chain"
                );
                return Ok(response);
            }

            let Some(target) = self.registry.by_name(&target_name) else {
                tracing::warn!(target = %target_name, "handoff target not found");
                return Ok(response);
            };

            if cancel.is_cancelled() {
                return Err(PilotError::Cancelled);
            }

            tracing::info!(
                from = %response.from_agent,
                to = %target_name,
                depth = depth + 1,
                session_id = context.session_id(),
                "executing handoff"
            );

            let handoff_context = response
                .handoff
                .as_ref()
                .and_then(|handoff| handoff.context.clone());
            let message = Message::agent(handoff_context.clone().unwrap_or_else(|| response.content.clone()))
                .from(response.from_agent.clone())
                .to(target_name.clone());
            context = context.with_handoff_depth(depth + 1);

            self.communication
                .log_handoff(
                    &response.from_agent,
                    &target_name,
                    &context,
                    handoff_context.as_deref(),
                )
                .await?;

            response = target.process(&message, &context, cancel).await?;
        }
    }
}
