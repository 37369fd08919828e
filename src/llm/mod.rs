//! Chat-completion interface used by the Validity Gate and the Rewrite Engine.
//!
//! - [`ChatModel`]: core trait, one-shot and streamed completions
//! - [`openai::OpenAiClient`]: OpenAI-compatible HTTP backend
//! - [`retry::RetryModel`]: decorator adding exponential backoff with jitter
//!
//! Streamed completions arrive as [`StreamEvent`]s. [`collect_stream`]
//! concatenates the text payloads until the end marker or an empty delta,
//! and only then is the accumulated text parsed as JSON.

pub mod openai;
pub mod retry;

use crate::error::LlmError;
use crate::utils::{looks_truncated, truncate_for_log};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// A system instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// JSON-schema constraint on the model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

/// Backend-neutral chat completion request.
///
/// With `response_schema` set, the backend must constrain the answer to the
/// schema in strict mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub response_schema: Option<ResponseSchema>,
}

/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text payload of a chunk; `None` when the chunk carried no content.
    Delta(Option<String>),
    /// Explicit end-of-stream sentinel.
    End,
}

/// Stream of completion chunks, ending with [`StreamEvent::End`].
pub type EventStream = BoxStream<'static, Result<StreamEvent, LlmError>>;

/// A chat completion backend.
///
/// Implemented by [`openai::OpenAiClient`] and, in tests, by a scripted model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Full answer text of a non-streamed completion.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Open a streamed completion. Errors opening the stream are returned
    /// here; errors while reading it arrive as stream items.
    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, LlmError>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }

    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, LlmError> {
        (**self).stream(request).await
    }
}

/// Concatenate streamed deltas.
///
/// Stops at [`StreamEvent::End`], at the first empty delta, or when the
/// stream is exhausted. A read error aborts the generation: the stream is
/// dropped and the error comes back as [`LlmError::MalformedModelOutput`].
pub async fn collect_stream(mut events: EventStream) -> Result<String, LlmError> {
    let mut message = String::new();
    while let Some(event) = events.next().await {
        match event {
            Ok(StreamEvent::Delta(Some(text))) if !text.is_empty() => message.push_str(&text),
            Ok(StreamEvent::Delta(_)) | Ok(StreamEvent::End) => break,
            Err(e) => {
                warn!(received = message.len(), error = %e, "Stream read failed; aborting generation");
                return Err(LlmError::MalformedModelOutput(format!("stream read failed: {e}")));
            }
        }
    }
    Ok(message)
}

/// Parse the model's answer text as JSON.
///
/// Reasoning blocks (`<think>...</think>`) and a surrounding markdown code
/// fence are tolerated; anything else that does not parse is a
/// [`LlmError::MalformedModelOutput`].
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let body = strip_wrapping(text);
    serde_json::from_str(body).map_err(|e| {
        warn!(
            truncated = looks_truncated(&e),
            error = %e,
            response_preview = %truncate_for_log(text, 300),
            "Model returned non-conforming JSON"
        );
        LlmError::MalformedModelOutput(e.to_string())
    })
}

/// The answer text stops in the middle of a JSON value (dropped stream,
/// token limit).
pub fn is_truncated(text: &str) -> bool {
    match serde_json::from_str::<serde::de::IgnoredAny>(strip_wrapping(text)) {
        Err(e) => looks_truncated(&e),
        Ok(_) => false,
    }
}

fn strip_wrapping(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(end) = body.find("</think>") {
        body = body[end + "</think>".len()..].trim();
    }
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde::Deserialize;

    fn events(items: Vec<Result<StreamEvent, LlmError>>) -> EventStream {
        stream::iter(items).boxed()
    }

    fn delta(s: &str) -> Result<StreamEvent, LlmError> {
        Ok(StreamEvent::Delta(Some(s.to_string())))
    }

    #[tokio::test]
    async fn test_collect_stops_at_end_marker() {
        let s = events(vec![delta("{\"a\":"), delta("1}"), Ok(StreamEvent::End), delta("junk")]);
        assert_eq!(collect_stream(s).await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_collect_stops_at_empty_delta() {
        let s = events(vec![delta("abc"), Ok(StreamEvent::Delta(None)), delta("def")]);
        assert_eq!(collect_stream(s).await.unwrap(), "abc");
        let s = events(vec![delta("abc"), delta(""), delta("def")]);
        assert_eq!(collect_stream(s).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_collect_read_error_is_malformed_output() {
        let s = events(vec![delta("{\"a\""), Err(LlmError::Http("reset".into()))]);
        let err = collect_stream(s).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedModelOutput(_)));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        valid: bool,
    }

    #[test]
    fn test_parse_json_tolerates_fences_and_reasoning() {
        let fenced = "```json\n{\"valid\": true}\n```";
        assert_eq!(parse_json::<Verdict>(fenced).unwrap(), Verdict { valid: true });
        let reasoning = "<think>short check</think>\n{\"valid\": false}";
        assert_eq!(parse_json::<Verdict>(reasoning).unwrap(), Verdict { valid: false });
    }

    #[test]
    fn test_parse_json_rejects_truncated_output() {
        let err = parse_json::<Verdict>("{\"valid\": tr").unwrap_err();
        assert!(matches!(err, LlmError::MalformedModelOutput(_)));
        assert!(is_truncated("{\"valid\": tr"));
        assert!(!is_truncated("{\"valid\": true}"));
        assert!(!is_truncated("not json"));
    }

    #[test]
    fn test_messages_serialize_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "x"}));
    }
}
