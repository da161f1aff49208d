use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{PilotConfig, ProviderOptions};
use crate::llm::{ChatRequest, ChatResponse, CompletionService, CompletionStream, UsageDetails};

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build provider HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn post(&self, request: &ChatRequest, stream: bool) -> reqwest::RequestBuilder {
        let body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });
        let mut builder = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .post(request, stream)
            .send()
            .await
            .context("provider request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("provider returned HTTP {status}: {}", body.trim());
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageDetails>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceContent>,
    #[serde(default)]
    delta: Option<ChoiceContent>,
}

#[derive(Debug, Deserialize)]
struct ChoiceContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Splits a byte stream into lines. Bytes are held until their line ends, so
/// a UTF-8 sequence cut across network chunks decodes intact.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline).collect::<Vec<_>>();
            lines.push(String::from_utf8_lossy(&line[..newline]).into_owned());
        }
        lines
    }
}

/// One `data:` line of a streamed completion. Other SSE lines are ignored.
fn parse_sse_line(line: &str) -> Result<Option<SseEvent>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    let body: CompletionBody =
        serde_json::from_str(data).context("malformed stream chunk from provider")?;
    let delta = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();
    Ok(Some(SseEvent::Delta(delta)))
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    async fn chat(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse> {
        let exchange = async {
            let response = self.send(&request, false).await?;
            let body: CompletionBody = response
                .json()
                .await
                .context("failed to decode provider response")?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message)
                .and_then(|message| message.content)
                .context("provider response has no message content")?;
            let mut reply = ChatResponse::complete(content);
            if let Some(usage) = body.usage {
                reply = reply.with_usage(usage);
            }
            Ok(reply)
        };

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("provider request cancelled"),
            reply = exchange => reply,
        }
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionStream> {
        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("provider request cancelled"),
            response = self.send(&request, true) => response?,
        };

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut lines = SseLineBuffer::default();
            let mut finished = false;
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("provider stream interrupted")?;
                for line in lines.push(&chunk) {
                    match parse_sse_line(&line)? {
                        Some(SseEvent::Delta(text)) if !text.is_empty() => {
                            yield ChatResponse::partial(text);
                        }
                        Some(SseEvent::Done) => finished = true,
                        _ => {}
                    }
                }
                if finished {
                    break;
                }
            }
            yield ChatResponse::complete(String::new());
        };

        Ok(stream
            .take_until(cancel.clone().cancelled_owned())
            .boxed())
    }
}

/// Stand-in for commands that build the runtime but never call a model.
pub struct OfflineCompletion;

#[async_trait]
impl CompletionService for OfflineCompletion {
    async fn chat(&self, _request: ChatRequest, _cancel: &CancellationToken) -> Result<ChatResponse> {
        anyhow::bail!("no completion provider configured")
    }

    async fn chat_stream(
        &self,
        _request: ChatRequest,
        _cancel: &CancellationToken,
    ) -> Result<CompletionStream> {
        anyhow::bail!("no completion provider configured")
    }
}

pub fn resolve_completion_service(
    config: &PilotConfig,
) -> Result<Arc<dyn CompletionService>> {
    let ProviderOptions {
        endpoint,
        model,
        api_key_env,
    } = &config.provider;

    let api_key = std::env::var(api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    if api_key.is_none() {
        if is_local_endpoint(endpoint) {
            tracing::debug!(endpoint = %endpoint, "no API key set, using local endpoint unauthenticated");
        } else {
            anyhow::bail!("{api_key_env} is required for provider endpoint '{endpoint}'");
        }
    }

    tracing::info!(endpoint = %endpoint, model = %model, "resolved completion provider");
    let client = OpenAiCompatibleClient::new(
        endpoint.clone(),
        model.clone(),
        api_key,
        Duration::from_millis(config.global.timeout_ms),
    )?;
    Ok(Arc::new(client))
}

fn is_local_endpoint(endpoint: &str) -> bool {
    let lower = endpoint.to_ascii_lowercase();
    lower.contains("://localhost") || lower.contains("://127.0.0.1") || lower.contains("://[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_parse_into_deltas_and_done() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).expect("line should parse"),
            Some(SseEvent::Delta("Hel".to_string()))
        );
        assert_eq!(
            parse_sse_line("data: [DONE]").expect("line should parse"),
            Some(SseEvent::Done)
        );
        assert_eq!(parse_sse_line(": keep-alive").expect("line should parse"), None);
        assert_eq!(parse_sse_line("").expect("line should parse"), None);
    }

    #[test]
    fn role_only_delta_is_empty() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(
            parse_sse_line(line).expect("line should parse"),
            Some(SseEvent::Delta(String::new()))
        );
    }

    #[test]
    fn malformed_stream_chunk_is_an_error() {
        assert!(parse_sse_line("data: {oops").is_err());
    }

    #[test]
    fn multibyte_text_split_across_chunks_decodes_intact() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line
            .iter()
            .position(|byte| *byte == 0xC3)
            .expect("line should contain the first byte of 'é'")
            + 1;

        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        let lines = buffer.push(&line[split..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_sse_line(&lines[0]).expect("line should parse"),
            Some(SseEvent::Delta("café".to_string()))
        );
    }

    #[test]
    fn one_chunk_can_carry_several_lines() {
        let mut buffer = SseLineBuffer::default();
        let lines = buffer.push(b"data: [DONE]\r\n\ndata: par");
        assert_eq!(lines, vec!["data: [DONE]\r".to_string(), String::new()]);
        assert_eq!(buffer.push(b"tial\n"), vec!["data: partial".to_string()]);
    }

    #[tokio::test]
    async fn offline_completion_refuses_every_call() {
        let cancel = CancellationToken::new();
        let request = ChatRequest::new(Vec::new());
        assert!(OfflineCompletion.chat(request.clone(), &cancel).await.is_err());
        assert!(OfflineCompletion.chat_stream(request, &cancel).await.is_err());
    }

    #[test]
    fn local_endpoints_do_not_need_keys() {
        assert!(is_local_endpoint("http://localhost:11434/v1"));
        assert!(is_local_endpoint("http://127.0.0.1:8080"));
        assert!(!is_local_endpoint("https://api.openai.com/v1"));
    }
}
