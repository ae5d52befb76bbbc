//! OpenAI-compatible completion and moderation client.
//!
//! Works with OpenAI itself and any endpoint exposing
//! `/v1/chat/completions` (OpenRouter, vLLM, Ollama, gateways). The same
//! client also speaks `/v1/moderations`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Moderation classification

use async_trait::async_trait;
use citeflow_core::error::ProviderError;
use citeflow_core::message::Message;
use citeflow_core::moderation::{ModerationResult, Moderator};
use citeflow_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        accept_sse: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if accept_sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, path, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post("chat/completions", &body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post("chat/completions", &body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line) = next_line(&mut buffer) {

                    let chunks = match parse_sse_line(&line) {
                        SseLine::Skip => continue,
                        SseLine::Done => {
                            let _ = tx.send(Ok(StreamChunk::end())).await;
                            return;
                        }
                        SseLine::Invalid(e) => {
                            trace!(
                                provider = %provider_name,
                                line = %line,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                            continue;
                        }
                        SseLine::Chunks(chunks) => chunks,
                    };

                    for chunk in chunks {
                        let done = chunk.done;
                        if tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                        if done {
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::end())).await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl Moderator for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn moderate(&self, inputs: &[String]) -> Result<Vec<ModerationResult>, ProviderError> {
        let body = serde_json::json!({ "input": inputs });

        debug!(provider = %self.name, count = inputs.len(), "Sending moderation request");

        let response = self.post("moderations", &body, false).await?;

        let parsed: ModerationApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse moderation response: {e}"),
            })?;

        Ok(parsed.results)
    }
}

/// Take the next complete line off `buffer`, without its terminator.
///
/// Lines are decoded only once whole, so a multibyte character split across
/// network chunks stays intact.
fn next_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
    let line = String::from_utf8_lossy(&raw[..line_end]);
    Some(line.trim_end_matches('\r').to_string())
}

/// Classification of one SSE line.
#[derive(Debug)]
enum SseLine {
    /// Blank line, comment, or non-data field
    Skip,
    /// `data: [DONE]`
    Done,
    Invalid(String),
    Chunks(Vec<StreamChunk>),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
        Ok(r) => r,
        Err(e) => return SseLine::Invalid(e.to_string()),
    };

    let mut chunks = Vec::new();

    if let Some(content) = stream_resp
        .choices
        .first()
        .and_then(|choice| choice.delta.content.clone())
        .filter(|c| !c.is_empty())
    {
        chunks.push(StreamChunk::text(content));
    }

    // Usage arrives on the last chunk when stream_options.include_usage is set
    if let Some(usage) = stream_resp.usage {
        chunks.push(StreamChunk {
            content: None,
            done: true,
            usage: Some(usage.into()),
        });
    }

    SseLine::Chunks(chunks)
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModerationApiResponse {
    results: Vec<ModerationResult>,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use citeflow_core::Role;

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test");
        assert_eq!(Provider::name(&provider), "openai");
        assert_eq!(provider.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new("local", "http://localhost:8000/v1/", "x");
        assert_eq!(provider.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 3);
        assert_eq!(api_messages[0].role, Role::System.as_str());
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(api_messages[2].role, "assistant");
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = ProviderRequest {
            model: "gpt-4".into(),
            messages: vec![Message::user("q")],
            temperature: 0.0,
            max_tokens: Some(100),
            stream: true,
            stop: vec![],
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("stop").is_none());

        let body = OpenAiCompatProvider::request_body(&request, false);
        assert!(body.get("stream_options").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn sse_content_line_yields_fragment() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        match parse_sse_line(line) {
            SseLine::Chunks(chunks) => {
                assert_eq!(chunks.len(), 1);
                assert_eq!(chunks[0].content.as_deref(), Some("Hel"));
                assert!(!chunks[0].done);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sse_finish_chunk_without_content_is_empty() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_sse_line(line), SseLine::Chunks(c) if c.is_empty()));
    }

    #[test]
    fn sse_usage_chunk_ends_stream() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        match parse_sse_line(line) {
            SseLine::Chunks(chunks) => {
                assert_eq!(chunks.len(), 1);
                assert!(chunks[0].done);
                assert_eq!(chunks[0].usage, Some(Usage::new(10, 5)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sse_done_comment_and_garbage() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseLine::Skip));
        assert!(matches!(parse_sse_line("data: {oops"), SseLine::Invalid(_)));
    }

    #[test]
    fn parse_moderation_response() {
        let data = r#"{
            "id": "modr-1",
            "model": "text-moderation-007",
            "results": [
                {"flagged": false, "categories": {"hate": false}, "category_scores": {"hate": 0.001}},
                {"flagged": true, "categories": {"hate": true}, "category_scores": {"hate": 0.97}}
            ]
        }"#;
        let parsed: ModerationApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert!(!parsed.results[0].flagged);
        assert!(parsed.results[1].flagged);
        assert_eq!(parsed.results[1].categories["hate"], true);
    }

    #[test]
    fn parse_completion_response() {
        let data = r#"{
            "model": "gpt-3.5-turbo-0613",
            "choices": [{"message": {"role": "assistant", "content": "Hi [a]"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.model, "gpt-3.5-turbo-0613");
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi [a]"));
        assert_eq!(Usage::from(parsed.usage.unwrap()), Usage::new(12, 3));
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\r\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&line[..split]);
        assert!(next_line(&mut buffer).is_none());

        buffer.extend_from_slice(&line[split..]);
        let decoded = next_line(&mut buffer).unwrap();
        assert!(buffer.is_empty());

        let SseLine::Chunks(chunks) = parse_sse_line(&decoded) else {
            panic!("expected content chunk from {decoded:?}");
        };
        assert_eq!(chunks[0].content.as_deref(), Some("café"));
    }

    #[test]
    fn next_line_keeps_partial_tail() {
        let mut buffer = b"data: one\n\ndata: tw".to_vec();
        assert_eq!(next_line(&mut buffer).as_deref(), Some("data: one"));
        assert_eq!(next_line(&mut buffer).as_deref(), Some(""));
        assert!(next_line(&mut buffer).is_none());
        assert_eq!(buffer, b"data: tw");
    }
}
