//! Shared request/response plumbing for single-capability agents.
//!
//! A specialist supplies the parts that differ (prompt assembly, the memory
//! entry it persists); `SpecialistAgent` owns the completion call, timing,
//! streaming relay and persistence.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{Agent, AgentKind, AgentResponse, ChunkStream, ResponseChunk, ToolCallRecord};
use crate::context::{AgentContext, Message};
use crate::error::{PilotError, Result};
use crate::llm::{
    ChatMessage, ChatRequest, CompletionService, DEFAULT_MAX_TOKENS, open_completion_stream,
    request_completion,
};
use crate::memory::{MemoryEntry, MemoryStore};

/// Collaborators every specialist talks to.
#[derive(Clone)]
pub struct WorkerDeps {
    pub completion: Arc<dyn CompletionService>,
    pub memory: Arc<dyn MemoryStore>,
}

impl WorkerDeps {
    pub fn new(completion: Arc<dyn CompletionService>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { completion, memory }
    }

    pub(crate) async fn store(&self, entry: MemoryEntry) -> Result<()> {
        self.memory.store(entry).await.map_err(PilotError::Memory)
    }
}

/// Per-agent overrides from configuration. `None` keeps the agent default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialistSettings {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Output of the gathering phase that precedes the main completion call.
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    pub prompt: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Emitted as a thinking chunk once gathering finishes (streaming only).
    pub progress: Option<String>,
}

impl Prepared {
    pub fn prompt(prompt: String) -> Self {
        Self {
            prompt,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Specialist: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn kind(&self) -> AgentKind;

    fn description(&self) -> &'static str;

    fn system_prompt(&self) -> &'static str;

    fn temperature(&self) -> f32;

    /// Thinking chunk sent before gathering starts (streaming only).
    fn opening_progress(&self) -> Option<&'static str> {
        None
    }

    async fn prepare(
        &self,
        deps: &WorkerDeps,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<Prepared>;

    /// Entry persisted once the answer is complete.
    fn memory_entry(&self, message: &Message, context: &AgentContext, content: &str) -> MemoryEntry;
}

pub struct SpecialistAgent<S> {
    specialist: Arc<S>,
    deps: WorkerDeps,
    settings: SpecialistSettings,
}

impl<S: Specialist> SpecialistAgent<S> {
    pub fn new(specialist: S, deps: WorkerDeps) -> Self {
        Self {
            specialist: Arc::new(specialist),
            deps,
            settings: SpecialistSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SpecialistSettings) -> Self {
        self.settings = settings;
        self
    }

    fn request(&self, prompt: String) -> ChatRequest {
        build_request(&*self.specialist, &self.settings, prompt)
    }
}

fn build_request<S: Specialist>(
    specialist: &S,
    settings: &SpecialistSettings,
    prompt: String,
) -> ChatRequest {
    let system_prompt = settings
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or(specialist.system_prompt());
    ChatRequest::new(vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)])
        .with_temperature(settings.temperature.unwrap_or(specialist.temperature()))
        .with_max_tokens(settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
}

#[async_trait]
impl<S: Specialist> Agent for SpecialistAgent<S> {
    fn name(&self) -> &str {
        self.specialist.name()
    }

    fn kind(&self) -> AgentKind {
        self.specialist.kind()
    }

    fn description(&self) -> &str {
        self.specialist.description()
    }

    async fn process(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        tracing::info!(
            agent = self.specialist.name(),
            session_id = context.session_id(),
            "specialist processing request"
        );

        let prepared = self
            .specialist
            .prepare(&self.deps, message, context, cancel)
            .await?;
        let response = request_completion(
            self.deps.completion.as_ref(),
            self.request(prepared.prompt),
            cancel,
        )
        .await?;

        self.deps
            .store(
                self.specialist
                    .memory_entry(message, context, &response.content),
            )
            .await?;

        Ok(AgentResponse::new(self.specialist.name(), response.content)
            .with_usage(response.usage.as_ref())
            .with_tool_calls(prepared.tool_calls)
            .with_duration(started.elapsed()))
    }

    async fn process_stream(
        &self,
        message: &Message,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let specialist = self.specialist.clone();
        let deps = self.deps.clone();
        let settings = self.settings.clone();
        let message = message.clone();
        let context = context.clone();
        let cancel = cancel.clone();

        let stream = async_stream::try_stream! {
            let name = specialist.name();
            if let Some(progress) = specialist.opening_progress() {
                yield ResponseChunk::thinking(name, progress);
            }

            let prepared = specialist.prepare(&deps, &message, &context, &cancel).await?;
            for call in &prepared.tool_calls {
                yield ResponseChunk::tool_call(name, describe_tool_call(call));
            }
            if let Some(progress) = prepared.progress.as_deref() {
                yield ResponseChunk::thinking(name, progress);
            }

            let request = build_request(&*specialist, &settings, prepared.prompt);
            let mut completion =
                open_completion_stream(deps.completion.as_ref(), request, &cancel).await?;
            let mut full_content = String::new();
            while let Some(part) = completion.next().await {
                let part = part.map_err(PilotError::Completion)?;
                full_content.push_str(&part.content);
                yield ResponseChunk::content(name, part.content, part.is_complete);
            }

            deps.store(specialist.memory_entry(&message, &context, &full_content))
                .await?;
        };
        Ok(stream.boxed())
    }
}

fn describe_tool_call(call: &ToolCallRecord) -> String {
    let outcome = if call.success {
        call.output.as_deref().unwrap_or("ok")
    } else {
        call.error.as_deref().unwrap_or("failed")
    };
    format!("{}({}) -> {outcome}", call.tool_name, call.parameters)
}
