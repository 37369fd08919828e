//! Validity Gate: asks the model whether an extracted article is usable.
//!
//! The gate runs once per article. Whatever the verdict, a completed run
//! stores `valid` and flips `validated`; only a failed model call leaves the
//! article untouched for a later attempt.

use crate::error::ProcessError;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ResponseSchema, parse_json};
use crate::models::{Article, ArticlePatch};
use crate::store::Repository;
use crate::utils::{html_to_text, truncate_chars};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Characters of article text shown to the model.
pub const CONTENT_LIMIT: usize = 1200;

const INSTRUCTIONS: &str = r#"You are a strict content compliance reviewer for a news desk. You receive the title and the opening text of an article that was extracted automatically from a web page. Decide whether the text is a usable news article.

The article is VALID only if ALL of the following conditions hold:
1. The text is meaningful, readable prose and not random characters, markup or code.
2. The content matches the title: it is about what the title announces.
3. The content has substantive informational value for a reader.
4. The content is not purely promotional, advertising or affiliate copy.
5. The content is not a paywall notice, login wall, cookie banner or an access-denied page.
6. Actual article content is present, not just a teaser or a placeholder.
7. The content is not only boilerplate such as dates, bylines, share buttons or "subscribe now" prompts.
8. Do not assume alignment that is not there: judge only the text you were given, never what the article might contain elsewhere.

If any condition fails, the article is NOT valid.

Answer with a JSON object {"valid": boolean, "message": string}. The message names the first failed condition, or briefly confirms validity."#;

/// The gate's answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(default)]
    pub message: String,
}

fn verdict_schema() -> ResponseSchema {
    ResponseSchema {
        name: "ValidityVerdict".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "valid": { "type": "boolean" },
                "message": { "type": "string" }
            },
            "required": ["valid", "message"],
            "additionalProperties": false
        }),
    }
}

/// Title plus the first [`CONTENT_LIMIT`] characters of the article text.
pub fn gate_prompt(title: &str, content: &str) -> String {
    let text = html_to_text(content);
    format!("Title: {}\nContent: {}", title.trim(), truncate_chars(&text, CONTENT_LIMIT))
}

/// Asks a chat model whether an article is real news.
pub struct ValidityGate {
    model: Arc<dyn ChatModel>,
    model_name: String,
    temperature: f64,
}

impl std::fmt::Debug for ValidityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidityGate")
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl ValidityGate {
    /// Create a gate over `model`.
    ///
    /// # Arguments
    ///
    /// * `model` - Chat backend to stream completions from
    /// * `model_name` - Model identifier sent with every request
    /// * `temperature` - Sampling temperature, usually low for a yes/no answer
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>, temperature: f64) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
        }
    }

    /// Assemble the chat request for one article, with the verdict schema attached.
    pub fn request(&self, title: &str, content: &str) -> ChatRequest {
        ChatRequest {
            model: self.model_name.clone(),
            messages: vec![
                ChatMessage::system(INSTRUCTIONS),
                ChatMessage::user(gate_prompt(title, content)),
            ],
            temperature: self.temperature,
            response_schema: Some(verdict_schema()),
        }
    }

    /// Ask for a verdict without touching the store.
    pub async fn judge(&self, title: &str, content: &str) -> Result<Verdict, ProcessError> {
        let answer = self.model.complete(&self.request(title, content)).await?;
        Ok(parse_json(&answer)?)
    }

    /// Judge `article` and persist `valid` and `validated = true`.
    #[instrument(level = "info", skip_all, fields(article = %article.id))]
    pub async fn validate(
        &self,
        repo: &Repository,
        article: &Article,
    ) -> Result<Verdict, ProcessError> {
        let verdict = self.judge(&article.title, &article.content).await?;
        repo.update_article(
            &article.id,
            &ArticlePatch {
                valid: Some(verdict.valid),
                validated: Some(true),
                ..Default::default()
            },
        )
        .await?;
        info!(valid = verdict.valid, message = %verdict.message, "Article judged");
        Ok(verdict)
    }
}
