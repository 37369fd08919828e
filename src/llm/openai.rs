//! OpenAI-compatible `/chat/completions` backend (OpenAI, LM Studio, vLLM).

use super::{ChatMessage, ChatModel, ChatRequest, EventStream, StreamEvent};
use crate::error::LlmError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
}

impl OpenAiClient {
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `http://127.0.0.1:1234/v1`
    /// * `api_key` - sent as a bearer token when present
    /// * `timeout` - whole-request timeout, streamed bodies included
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| LlmError::Http(format!("invalid API key header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<Response, LlmError> {
        let t0 = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RequestBody::new(request, stream))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Chat completion rejected"
            );
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let t0 = Instant::now();
        let parsed: CompletionResponse = self
            .send(request, false)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::MalformedModelOutput(e.to_string()))?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "Completion received");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::MalformedModelOutput("completion had no content".into()))
    }

    #[instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, LlmError> {
        let bytes = Box::pin(self.send(request, true).await?.bytes_stream());

        let state = (bytes, SseDecoder::default(), VecDeque::new(), false);
        let events = stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err(LlmError::Http(e.to_string())));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        });
        Ok(events.boxed())
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

impl<'a> RequestBody<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: request.response_schema.as_ref().map(|s| {
                json!({
                    "type": "json_schema",
                    "json_schema": { "name": s.name, "strict": true, "schema": s.schema }
                })
            }),
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    role: Option<String>,
    content: Option<String>,
}

/// Incremental server-sent-events decoder for completion chunks.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk of the response body.
    ///
    /// # Returns
    ///
    /// Every event completed by this chunk. `[DONE]` yields [`StreamEvent::End`]
    /// and unparseable `data:` lines yield errors.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, LlmError>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, LlmError>> {
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        decode_line(&line).into_iter().collect()
    }
}

fn decode_line(line: &str) -> Option<Result<StreamEvent, LlmError>> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload == "[DONE]" || payload == "EOF" {
        return Some(Ok(StreamEvent::End));
    }
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(LlmError::MalformedModelOutput(format!(
                "undecodable stream chunk: {e}"
            ))));
        }
    };
    let delta = chunk.choices.into_iter().next().map(|c| c.delta).unwrap_or_default();
    match delta {
        // opening chunk announces the role only
        Delta {
            role: Some(_),
            content,
        } if content.as_deref().is_none_or(str::is_empty) => None,
        Delta { content, .. } => Some(Ok(StreamEvent::Delta(content))),
    }
}
