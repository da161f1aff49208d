/// Agents that answer user messages.
///
/// **Router**:
/// - `orchestrator`: classifies intent, delegates or fans out, synthesizes
///
/// **Specialists** (one capability each, sharing `specialist::SpecialistAgent`):
/// - `planning`: task breakdowns and estimates, persisted as plans
/// - `research`: query extraction, optional web search, findings
/// - `reporting`: status reports built from stored session entries
pub mod orchestrator;
pub mod planning;
pub mod prompt;
pub mod reporting;
pub mod research;
pub mod specialist;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::{AgentContext, Message};
use crate::error::Result;
use crate::llm::UsageDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentKind {
    Orchestrator,
    Planning,
    Research,
    Reporting,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Orchestrator => "Orchestrator",
            AgentKind::Planning => "Planning",
            AgentKind::Research => "Research",
            AgentKind::Reporting => "Reporting",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<&UsageDetails> for TokenUsage {
    fn from(usage: &UsageDetails) -> Self {
        let prompt_tokens = usage.prompt_tokens.unwrap_or(0);
        let completion_tokens = usage.completion_tokens.unwrap_or(0);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: usage
                .total_tokens
                .unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub parameters: Value,
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target: String,
    /// Replaces the source content in the message sent to `target`.
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub id: String,
    pub content: String,
    pub from_agent: String,
    pub handoff: Option<HandoffRequest>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Option<TokenUsage>,
    pub duration: Duration,
}

impl AgentResponse {
    pub fn new(from_agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            from_agent: from_agent.into(),
            handoff: None,
            tool_calls: Vec::new(),
            usage: None,
            duration: Duration::ZERO,
        }
    }

    pub fn with_handoff(mut self, target: impl Into<String>, context: Option<String>) -> Self {
        self.handoff = Some(HandoffRequest {
            target: target.into(),
            context,
        });
        self
    }

    pub fn with_usage(mut self, usage: Option<&UsageDetails>) -> Self {
        self.usage = usage.map(TokenUsage::from);
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Non-empty hand-off target, if this response asks for one.
    pub fn handoff_target(&self) -> Option<&str> {
        self.handoff
            .as_ref()
            .map(|handoff| handoff.target.trim())
            .filter(|target| !target.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkKind {
    Content,
    ToolCall,
    Thinking,
    Handoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub content: String,
    pub from_agent: String,
    pub is_complete: bool,
    pub kind: ChunkKind,
}

impl ResponseChunk {
    pub fn content(from_agent: &str, content: impl Into<String>, is_complete: bool) -> Self {
        Self {
            content: content.into(),
            from_agent: from_agent.to_string(),
            is_complete,
            kind: ChunkKind::Content,
        }
    }

    pub fn thinking(from_agent: &str, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_agent: from_agent.to_string(),
            is_complete: false,
            kind: ChunkKind::Thinking,
        }
    }

    /// `content` is the name of the agent taking over.
    pub fn handoff(from_agent: &str, target: &str) -> Self {
        Self {
            content: target.to_string(),
            from_agent: from_agent.to_string(),
            is_complete: false,
            kind: ChunkKind::Handoff,
        }
    }

    pub fn tool_call(from_agent: &str, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            from_agent: from_agent.to_string(),
            is_complete: false,
            kind: ChunkKind::ToolCall,
        }
    }
}

/// Lazy, single-consumer chunk sequence. The final chunk has `is_complete`.
pub type ChunkStream = BoxStream<'static, Result<ResponseChunk>>;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    fn description(&self) -> &str;

    async fn process(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse>;

    async fn process_stream(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_handoff_target_is_ignored() {
        let response = AgentResponse::new("Planning", "done").with_handoff("  ", None);
        assert_eq!(response.handoff_target(), None);

        let response = AgentResponse::new("Planning", "done").with_handoff("Research", None);
        assert_eq!(response.handoff_target(), Some("Research"));
    }

    #[test]
    fn usage_total_falls_back_to_sum() {
        let usage = TokenUsage::from(&UsageDetails {
            prompt_tokens: Some(12),
            completion_tokens: Some(30),
            total_tokens: None,
        });
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn usage_sum_saturates_on_oversized_counts() {
        let usage = TokenUsage::from(&UsageDetails {
            prompt_tokens: Some(u32::MAX - 1),
            completion_tokens: Some(10),
            total_tokens: None,
        });
        assert_eq!(usage.total_tokens, u32::MAX);
    }
}
