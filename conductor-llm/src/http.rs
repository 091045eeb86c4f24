//! An OpenAI-compatible chat-completions client. Works against any
//! provider that speaks the same `/v1/chat/completions` shape (most hosted
//! LLM gateways do); swap the base URL and API key to point elsewhere.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{CompletionStream, LlmClient};
use crate::error::{LlmError, LlmResult};
use crate::types::{CompletionRequest, CompletionResponse, FinishReason};

pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), api_key: api_key.into() }
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(schema) = &request.json_schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "decision", "schema": schema, "strict": true },
            });
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.body(&request, false);
        debug!(model = %request.model, "sending completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidRequest(text));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidRequest("no choices in response".into()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> LlmResult<CompletionStream> {
        let body = self.body(&request, true);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidRequest(text));
        }

        let byte_stream = response.bytes_stream();
        let stream = byte_stream.flat_map(|chunk| {
            let lines: Vec<LlmResult<String>> = match chunk {
                Ok(bytes) => parse_sse_lines(&bytes),
                Err(e) => vec![Err(LlmError::Http(e))],
            };
            futures::stream::iter(lines)
        });

        Ok(Box::pin(stream))
    }
}

/// Pulls `data: {...}` SSE frames out of a raw chunk and extracts each
/// delta's text content, skipping the terminal `data: [DONE]` marker.
fn parse_sse_lines(bytes: &[u8]) -> Vec<LlmResult<String>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else { continue };
        if payload.trim() == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                    out.push(Ok(delta.to_string()));
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed SSE frame");
                out.push(Err(LlmError::MalformedJson(payload.to_string())));
            }
        }
    }
    out
}
