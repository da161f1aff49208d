//! Contract for the language-model completion backend.
//!
//! The orchestration layer only ever sees `CompletionService`; concrete
//! providers live behind it (see `provider`).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PilotError, Result};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDetails {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<UsageDetails>,
    pub is_complete: bool,
}

impl ChatResponse {
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            is_complete: true,
        }
    }

    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            is_complete: false,
        }
    }

    pub fn with_usage(mut self, usage: UsageDetails) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Incremental completion output. The last item carries `is_complete = true`.
pub type CompletionStream = BoxStream<'static, anyhow::Result<ChatResponse>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ChatResponse>;

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<CompletionStream>;
}

pub(crate) async fn request_completion(
    service: &dyn CompletionService,
    request: ChatRequest,
    cancel: &CancellationToken,
) -> Result<ChatResponse> {
    if cancel.is_cancelled() {
        return Err(PilotError::Cancelled);
    }
    service
        .chat(request, cancel)
        .await
        .map_err(PilotError::Completion)
}

pub(crate) async fn open_completion_stream(
    service: &dyn CompletionService,
    request: ChatRequest,
    cancel: &CancellationToken,
) -> Result<CompletionStream> {
    if cancel.is_cancelled() {
        return Err(PilotError::Cancelled);
    }
    service
        .chat_stream(request, cancel)
        .await
        .map_err(PilotError::Completion)
}
