//! OpenAI-compatible chat-completions backend.
//!
//! - `POST {base_url}/chat/completions` for generation, optionally streamed
//!   as Server-Sent Events (`data: {json}` lines, ended by `data: [DONE]`)
//! - `GET {base_url}/models` for connection tests

use super::{ConnectionCheck, Generator, TokenStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storyflow_core::{GenerationParams, StoryflowError};

/// Connection tests give up sooner than generations.
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream error bodies are cut to this many characters in messages.
const MAX_ERROR_BODY: usize = 500;

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(prompt: &'a str, params: &'a GenerationParams, stream: bool) -> Self {
        Self {
            model: &params.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stream,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

// =============================================================================
// SSE PARSING
// =============================================================================

/// Meaning of one line of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// A content delta.
    Token(String),
    /// The `[DONE]` terminator.
    Done,
    /// Blank lines, comments, other fields, undecodable or empty deltas.
    Skip,
}

/// Classify one SSE line.
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(SseLine::Skip, SseLine::Token),
        Err(_) => SseLine::Skip,
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client for one OpenAI-compatible endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// An empty `api_key` sends no `Authorization` header.
    pub fn new(client: reqwest::Client, base_url: &str, model: &str, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    async fn send_chat(
        &self,
        body: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, StoryflowError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(StoryflowError::upstream(
                Some(status.as_u16()),
                format!("endpoint answered {}: {}", status, text),
            ));
        }
        Ok(response)
    }
}

fn transport_error(e: reqwest::Error) -> StoryflowError {
    if e.is_timeout() {
        StoryflowError::upstream(None, "request timed out")
    } else {
        StoryflowError::upstream(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, StoryflowError> {
        let response = self
            .send_chat(&ChatRequest::new(prompt, params, false))
            .await?;
        let body: ChatResponse = response.json().await.map_err(|e| {
            StoryflowError::upstream(None, format!("malformed completion response: {}", e))
        })?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| StoryflowError::upstream(None, "completion response had no choices"))
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, StoryflowError> {
        let response = self
            .send_chat(&ChatRequest::new(prompt, params, true))
            .await?;
        let mut body = response.bytes_stream();

        let tokens = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut done = false;

            while !done {
                let Some(chunk) = body.next().await else {
                    break;
                };
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(transport_error(e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        SseLine::Token(token) => yield Ok(token),
                        SseLine::Done => {
                            done = true;
                            break;
                        }
                        SseLine::Skip => {}
                    }
                }
            }

            // last line without a trailing newline
            if !done {
                if let SseLine::Token(token) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                    yield Ok(token);
                }
            }
        };

        Ok(Box::pin(tokens))
    }

    async fn test_connection(&self) -> ConnectionCheck {
        let url = format!("{}/models", self.base_url);
        let request = self
            .authorized(self.client.get(url))
            .timeout(CONNECTION_TEST_TIMEOUT);

        match request.send().await {
            Ok(response) if response.status().is_success() => ConnectionCheck::ok(&self.model),
            Ok(response) => {
                ConnectionCheck::failed(format!("endpoint answered {}", response.status()))
            }
            Err(e) if e.is_timeout() => ConnectionCheck::failed("connection timed out"),
            Err(e) => ConnectionCheck::failed(format!("connection failed: {}", e)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
