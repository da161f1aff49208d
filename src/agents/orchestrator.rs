//! Orchestrator: classifies intent and routes to specialists.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::prompt::{CONVERSATION_WINDOW, build_conversation_messages};
use super::{Agent, AgentKind, AgentResponse, ChunkStream, ResponseChunk};
use crate::communication::CommunicationService;
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::llm::{
    ChatMessage, ChatRequest, CompletionService, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    open_completion_stream, request_completion,
};
use crate::parallel::ParallelExecutor;
use crate::registry::AgentRegistry;

pub const ORCHESTRATOR_NAME: &str = "Orchestrator";
pub const GENERAL_INTENT: &str = "general";

const CLASSIFICATION_TEMPERATURE: f32 = 0.1;
const CLASSIFICATION_MAX_TOKENS: u32 = 200;
const FALLBACK_CONFIDENCE: f32 = 0.5;

const SYSTEM_PROMPT: &str = "\
You are the Orchestrator Agent for ProjectPilot, an AI-powered project management assistant.

Your responsibilities:
1. Analyze user requests to understand their intent
2. Route requests to the appropriate specialist agent
3. Coordinate multi-agent workflows when needed
4. Synthesize responses from multiple agents

Available specialist agents:
- Planning: task breakdown, prioritization, effort estimation, dependency mapping
- Research: web search, documentation lookup, best practices, technology comparisons
- Reporting: status summaries, progress metrics, risk reports, insights

If a request spans multiple domains, coordinate with multiple agents and synthesize their outputs.
If unclear, ask the user for clarification.";

/// Intent label to specialist kind. Anything absent is handled directly.
pub const INTENT_ROUTES: &[(&str, AgentKind)] = &[
    ("planning", AgentKind::Planning),
    ("research", AgentKind::Research),
    ("reporting", AgentKind::Reporting),
];

pub fn route_for_intent(intent: &str) -> Option<AgentKind> {
    INTENT_ROUTES
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(intent.trim()))
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentClassification {
    pub primary_intent: String,
    #[serde(default)]
    pub secondary_intents: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl IntentClassification {
    pub fn general_fallback() -> Self {
        Self {
            primary_intent: GENERAL_INTENT.to_string(),
            secondary_intents: None,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: None,
        }
    }

    /// Parses the classifier's reply, falling back to `general` on anything
    /// that isn't a usable JSON object.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_else(|| {
            tracing::debug!(reply = %raw, "unparseable classification, using default");
            Self::general_fallback()
        })
    }

    fn try_parse(raw: &str) -> Option<Self> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end < start {
            return None;
        }
        let mut parsed: Self = serde_json::from_str(&raw[start..=end]).ok()?;

        parsed.primary_intent = parsed.primary_intent.trim().to_ascii_lowercase();
        if parsed.primary_intent.is_empty() {
            parsed.primary_intent = GENERAL_INTENT.to_string();
        }
        parsed.secondary_intents = parsed.secondary_intents.map(|intents| {
            intents
                .into_iter()
                .map(|intent| intent.trim().to_ascii_lowercase())
                .filter(|intent| !intent.is_empty())
                .collect()
        });
        parsed.confidence = if parsed.confidence.is_finite() {
            parsed.confidence.clamp(0.0, 1.0)
        } else {
            FALLBACK_CONFIDENCE
        };
        Some(parsed)
    }

    pub fn secondary(&self) -> &[String] {
        self.secondary_intents.as_deref().unwrap_or_default()
    }

    pub fn requires_multiple_agents(&self) -> bool {
        !self.secondary().is_empty()
    }

    /// Primary followed by secondaries, first occurrence wins.
    pub fn all_intents(&self) -> Vec<String> {
        let mut intents: Vec<String> = Vec::with_capacity(1 + self.secondary().len());
        for intent in std::iter::once(&self.primary_intent).chain(self.secondary()) {
            if !intents.contains(intent) {
                intents.push(intent.clone());
            }
        }
        intents
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub enable_parallel_execution: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            enable_parallel_execution: true,
        }
    }
}

struct Core {
    completion: Arc<dyn CompletionService>,
    registry: Arc<AgentRegistry>,
    communication: Arc<CommunicationService>,
    executor: Arc<ParallelExecutor>,
    settings: OrchestratorSettings,
}

pub struct OrchestratorAgent {
    core: Arc<Core>,
}

impl OrchestratorAgent {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        registry: Arc<AgentRegistry>,
        communication: Arc<CommunicationService>,
        executor: Arc<ParallelExecutor>,
    ) -> Self {
        Self::with_settings(
            completion,
            registry,
            communication,
            executor,
            OrchestratorSettings::default(),
        )
    }

    pub fn with_settings(
        completion: Arc<dyn CompletionService>,
        registry: Arc<AgentRegistry>,
        communication: Arc<CommunicationService>,
        executor: Arc<ParallelExecutor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                completion,
                registry,
                communication,
                executor,
                settings,
            }),
        }
    }

    pub async fn classify(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<IntentClassification> {
        self.core.classify(message, cancel).await
    }
}

impl Core {
    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(SYSTEM_PROMPT)
    }

    async fn classify(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<IntentClassification> {
        let prompt = format!(
            "Classify the following user request into one or more categories.\n\n\
             User request: {}\n\n\
             Categories:\n\
             - planning: Task breakdown, prioritization, estimation, scheduling\n\
             - research: Information lookup, documentation, best practices\n\
             - reporting: Status updates, metrics, progress summaries\n\
             - general: General questions, clarifications, greetings\n\n\
             Respond in JSON format:\n\
             {{\n  \"primaryIntent\": \"planning|research|reporting|general\",\n  \
             \"secondaryIntents\": [\"intent1\", \"intent2\"],\n  \
             \"confidence\": 0.0-1.0,\n  \"reasoning\": \"brief explanation\"\n}}",
            message.content
        );
        let request = ChatRequest::new(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(prompt),
        ])
        .with_temperature(CLASSIFICATION_TEMPERATURE)
        .with_max_tokens(CLASSIFICATION_MAX_TOKENS);

        let response = request_completion(self.completion.as_ref(), request, cancel).await?;
        Ok(IntentClassification::parse(&response.content))
    }

    fn conversational_request(&self, message: &Message, context: &AgentContext) -> ChatRequest {
        ChatRequest::new(build_conversation_messages(
            context,
            message,
            self.system_prompt(),
            CONVERSATION_WINDOW,
        ))
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens)
    }

    async fn handle_general(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let response = request_completion(
            self.completion.as_ref(),
            self.conversational_request(message, context),
            cancel,
        )
        .await?;
        Ok(AgentResponse::new(ORCHESTRATOR_NAME, response.content).with_usage(response.usage.as_ref()))
    }

    async fn delegate(
        &self,
        message: &Message,
        context: &AgentContext,
        intent: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let target = route_for_intent(intent).and_then(|kind| self.registry.by_kind(kind));
        let Some(target) = target else {
            return self.handle_general(message, context, cancel).await;
        };

        tracing::info!(
            agent = target.name(),
            intent,
            session_id = context.session_id(),
            "delegating to specialist"
        );
        let response = target.process(message, context, cancel).await?;
        self.communication
            .log_handoff(ORCHESTRATOR_NAME, target.name(), context, Some(intent))
            .await?;
        Ok(response)
    }

    async fn coordinate(
        &self,
        message: &Message,
        context: &AgentContext,
        classification: &IntentClassification,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let intents = classification.all_intents();
        tracing::info!(intents = %intents.join(", "), "coordinating multi-agent response");

        let responses = if self.settings.enable_parallel_execution {
            let branches = intents
                .iter()
                .map(|intent| {
                    let context = context.clone();
                    async move { self.delegate(message, &context, intent, cancel).await }.boxed()
                })
                .collect();
            self.executor.run_gated(branches, cancel).await?
        } else {
            let mut responses = Vec::with_capacity(intents.len());
            for intent in &intents {
                responses.push(self.delegate(message, context, intent, cancel).await?);
            }
            responses
        };

        self.synthesize(message, &responses, cancel).await
    }

    async fn synthesize(
        &self,
        message: &Message,
        responses: &[AgentResponse],
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let mut labeled = String::new();
        for (i, response) in responses.iter().enumerate() {
            if i > 0 {
                labeled.push_str("\n\n");
            }
            let _ = write!(labeled, "[{}]: {}", response.from_agent, response.content);
        }
        let prompt = format!(
            "You received responses from multiple specialist agents for the user's request.\n\
             Synthesize these into a coherent, unified response.\n\n\
             User request: {}\n\n\
             Agent responses:\n{}\n\n\
             Create a unified response that:\n\
             1. Integrates information from all agents\n\
             2. Maintains a coherent narrative\n\
             3. Avoids redundancy\n\
             4. Clearly attributes specialized information to its source when relevant",
            message.content, labeled
        );
        let request = ChatRequest::new(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(prompt),
        ])
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens);

        let synthesized = request_completion(self.completion.as_ref(), request, cancel).await?;
        Ok(AgentResponse::new(ORCHESTRATOR_NAME, synthesized.content)
            .with_usage(synthesized.usage.as_ref()))
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    fn name(&self) -> &str {
        ORCHESTRATOR_NAME
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Orchestrator
    }

    fn description(&self) -> &str {
        "Central coordinator that routes requests and manages agent workflows"
    }

    async fn process(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        tracing::info!(
            message_id = %message.id,
            session_id = context.session_id(),
            "orchestrator processing message"
        );

        let classification = self.core.classify(message, cancel).await?;
        tracing::info!(
            intent = %classification.primary_intent,
            confidence = classification.confidence,
            secondary = classification.secondary().len(),
            "intent classified"
        );

        let response = if classification.requires_multiple_agents() {
            self.core
                .coordinate(message, context, &classification, cancel)
                .await?
        } else {
            self.core
                .delegate(message, context, &classification.primary_intent, cancel)
                .await?
        };
        Ok(response.with_duration(started.elapsed()))
    }

    async fn process_stream(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let core = self.core.clone();
        let message = message.clone();
        let context = context.clone();
        let cancel = cancel.clone();

        let stream = async_stream::try_stream! {
            let classification = core.classify(&message, &cancel).await?;
            yield ResponseChunk::thinking(
                ORCHESTRATOR_NAME,
                format!("Routing to {} specialist...", classification.primary_intent),
            );

            let target = route_for_intent(&classification.primary_intent)
                .and_then(|kind| core.registry.by_kind(kind));
            match target {
                Some(target) => {
                    yield ResponseChunk::handoff(ORCHESTRATOR_NAME, target.name());
                    core.communication
                        .log_handoff(
                            ORCHESTRATOR_NAME,
                            target.name(),
                            &context,
                            Some(classification.primary_intent.as_str()),
                        )
                        .await?;
                    let mut relayed = target.process_stream(&message, &context, &cancel).await?;
                    while let Some(chunk) = relayed.next().await {
                        yield chunk?;
                    }
                }
                None => {
                    let request = core.conversational_request(&message, &context);
                    let mut completion =
                        open_completion_stream(core.completion.as_ref(), request, &cancel).await?;
                    while let Some(part) = completion.next().await {
                        let part = part.map_err(PilotError::Completion)?;
                        yield ResponseChunk::content(ORCHESTRATOR_NAME, part.content, part.is_complete);
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_a_case_insensitive_lookup() {
        assert_eq!(route_for_intent("planning"), Some(AgentKind::Planning));
        assert_eq!(route_for_intent(" Research "), Some(AgentKind::Research));
        assert_eq!(route_for_intent("REPORTING"), Some(AgentKind::Reporting));
        assert_eq!(route_for_intent("general"), None);
        assert_eq!(route_for_intent("weather"), None);
    }

    #[test]
    fn classification_parses_fenced_json() {
        let raw = "```json\n{\"primaryIntent\": \"Planning\", \"secondaryIntents\": [\"research\", \"\"], \
                   \"confidence\": 1.7, \"reasoning\": \"tasks\"}\n```";
        let parsed = IntentClassification::parse(raw);
        assert_eq!(parsed.primary_intent, "planning");
        assert_eq!(parsed.secondary(), ["research".to_string()]);
        assert_eq!(parsed.confidence, 1.0);
        assert!(parsed.requires_multiple_agents());
    }

    #[test]
    fn malformed_classification_defaults_to_general() {
        for raw in ["", "planning please", "{\"confidence\": 0.9}", "} {"] {
            let parsed = IntentClassification::parse(raw);
            assert_eq!(parsed, IntentClassification::general_fallback(), "input: {raw:?}");
        }
    }

    #[test]
    fn all_intents_deduplicates_in_order() {
        let classification = IntentClassification {
            primary_intent: "research".into(),
            secondary_intents: Some(vec![
                "planning".into(),
                "research".into(),
                "planning".into(),
                "reporting".into(),
            ]),
            confidence: 0.8,
            reasoning: None,
        };
        assert_eq!(
            classification.all_intents(),
            vec!["research", "planning", "reporting"]
        );
    }
}
