//! Rewrite Engine: turns a validated article into publishable copy.
//!
//! The model answer is streamed, accumulated, and parsed as JSON only once
//! the stream ends. A parsed answer is then checked against the structural
//! contract (word counts, paragraphs, category); an answer that breaks it is
//! a [`LlmError::MalformedModelOutput`] just like unparseable JSON, and the
//! article stays unprocessed.

use crate::error::{LlmError, ProcessError};
use crate::llm::{
    ChatMessage, ChatModel, ChatRequest, ResponseSchema, collect_stream, is_truncated, parse_json,
};
use crate::models::{Article, ArticlePatch};
use crate::store::Repository;
use crate::utils::{html_to_text, paragraphs, word_count};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Categories a rewrite may be filed under.
pub const CATEGORIES: [&str; 9] = [
    "business",
    "education",
    "lifestyle",
    "technology",
    "travel",
    "entertainment",
    "health",
    "world",
    "sports",
];

/// Word bounds for the rewritten title.
pub const TITLE_WORDS: RangeInclusive<usize> = 5..=15;
/// Word bounds for the rewritten description.
pub const DESCRIPTION_WORDS: RangeInclusive<usize> = 30..=50;
/// Word bounds for the rewritten article body.
pub const ARTICLE_WORDS: RangeInclusive<usize> = 150..=250;
/// Fewest paragraphs the rewritten body may have.
pub const MIN_PARAGRAPHS: usize = 3;

const INSTRUCTIONS: &str = r#"You are a seasoned journalist with decades of experience reporting on geopolitical affairs, human narratives and transformational events. Your voice is calm, observant and grounded in reality.

TONE & STYLE
- Formal, third-person tone. No personal anecdotes, no "I".
- Evocative yet balanced; never overdramatize.
- Metaphor and imagery only where they add clarity.
- Factually faithful, structurally elegant, emotionally intelligent.

You are given an article or a short briefing from a co-worker. Rewrite it.

OUTPUT FORMAT

Title (5 to 15 words)
- Catchy yet respectful; draws attention without clickbait.
- Must be rewritten for relevance and elegance.

Description (strictly 30 to 50 words, never exceed)
- A precise, engaging summary that invites the reader to continue.
- Third-person only. Do not ramble.

Article (150 to 250 words)
- Third-person, formal journalistic tone.
- 3 or more paragraphs separated by a blank line, each offering a distinct idea or development.
- Convey context, conflict and nuance clearly.
- End on a reflective or balanced note.

Keywords
- Short, relevant, lowercase tags.

Category
- Exactly one of: business, education, lifestyle, technology, travel, entertainment, health, world, sports.

STRICT RULES, NEVER BREAK:
- NEVER write in first person.
- NEVER exceed 50 words in the description.
- NEVER invent facts or imply anything not clearly in the source.
- NEVER copy the title, description or article as it is."#;

/// The model's structured answer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rewrite {
    pub title: String,
    pub description: String,
    pub article: String,
    pub keywords: Vec<String>,
    pub category: String,
}

impl Rewrite {
    /// Trim fields, lowercase and dedupe keywords, lowercase the category.
    pub fn normalize(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.description = self.description.trim().to_string();
        self.article = self.article.trim().replace("\r\n", "\n");
        self.keywords = self
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .unique()
            .collect();
        self.category = self.category.trim().to_lowercase();
        self
    }

    /// Every broken structural constraint, as a readable list.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        let check = |out: &mut Vec<String>, field: &str, words: usize, range: &RangeInclusive<usize>| {
            if !range.contains(&words) {
                out.push(format!(
                    "{field} has {words} words, expected {}-{}",
                    range.start(),
                    range.end()
                ));
            }
        };
        check(&mut out, "title", word_count(&self.title), &TITLE_WORDS);
        check(&mut out, "description", word_count(&self.description), &DESCRIPTION_WORDS);
        check(&mut out, "article", word_count(&self.article), &ARTICLE_WORDS);

        let paragraphs = paragraphs(&self.article).len();
        if paragraphs < MIN_PARAGRAPHS {
            out.push(format!("article has {paragraphs} paragraphs, expected at least {MIN_PARAGRAPHS}"));
        }
        if self.keywords.is_empty() {
            out.push("no keywords".to_string());
        }
        if !CATEGORIES.contains(&self.category.as_str()) {
            out.push(format!("unknown category {:?}", self.category));
        }
        out
    }

    /// Keywords joined as a comma-separated list.
    pub fn keyword_list(&self) -> String {
        self.keywords.join(", ")
    }
}

fn rewrite_schema() -> ResponseSchema {
    ResponseSchema {
        name: "Reporter".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "description": { "type": "string" },
                "article": { "type": "string" },
                "keywords": { "type": "array", "items": { "type": "string" } },
                "category": { "type": "string", "enum": CATEGORIES }
            },
            "required": ["title", "description", "article", "keywords", "category"],
            "additionalProperties": false
        }),
    }
}

/// Build the user message for a rewrite.
///
/// # Arguments
///
/// * `title` - Original article title
/// * `content` - Original article body, HTML or plain text
/// * `keywords` - Raw keywords scraped from the page, may be empty
///
/// # Returns
///
/// A prompt with the title, the body reduced to plain text, and the keywords.
pub fn rewrite_prompt(title: &str, content: &str, keywords: &str) -> String {
    format!(
        "Title: {}\nContent: {}\nraw keywords: {}",
        title.trim(),
        html_to_text(content),
        keywords.trim()
    )
}

/// Asks a chat model to rewrite an article in house style.
///
/// Answers are checked against the word and paragraph bounds above. A
/// truncated stream is retried once before giving up.
pub struct RewriteEngine {
    model: Arc<dyn ChatModel>,
    model_name: String,
    temperature: f64,
    enforce_constraints: bool,
}

impl std::fmt::Debug for RewriteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteEngine")
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("enforce_constraints", &self.enforce_constraints)
            .finish_non_exhaustive()
    }
}

impl RewriteEngine {
    /// Create an engine with constraint enforcement on.
    ///
    /// # Arguments
    ///
    /// * `model` - Chat backend to stream completions from
    /// * `model_name` - Model identifier sent with every request
    /// * `temperature` - Sampling temperature
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>, temperature: f64) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
            enforce_constraints: true,
        }
    }

    /// With enforcement off, out-of-bounds answers are logged and accepted.
    pub fn enforce_constraints(mut self, enforce: bool) -> Self {
        self.enforce_constraints = enforce;
        self
    }

    /// Assemble the chat request for one article.
    ///
    /// The request carries the strict `Reporter` response schema.
    pub fn request(&self, title: &str, content: &str, keywords: &str) -> ChatRequest {
        ChatRequest {
            model: self.model_name.clone(),
            messages: vec![
                ChatMessage::system(INSTRUCTIONS),
                ChatMessage::user(rewrite_prompt(title, content, keywords)),
            ],
            temperature: self.temperature,
            response_schema: Some(rewrite_schema()),
        }
    }

    /// Stream a rewrite and check it. A truncated answer is re-asked once.
    pub async fn generate(
        &self,
        title: &str,
        content: &str,
        keywords: &str,
    ) -> Result<Rewrite, LlmError> {
        let request = self.request(title, content, keywords);
        let mut reasked = false;
        let text = loop {
            let text = collect_stream(self.model.stream(&request).await?).await?;
            if !reasked && is_truncated(&text) {
                warn!(received = text.len(), "EOF while parsing; re-asking once");
                reasked = true;
                continue;
            }
            break text;
        };

        let rewrite = parse_json::<Rewrite>(&text)?.normalize();
        let violations = rewrite.violations();
        if !violations.is_empty() {
            if self.enforce_constraints {
                warn!(violations = ?violations, "Rewrite breaks the output contract");
                return Err(LlmError::MalformedModelOutput(format!(
                    "rewrite violates constraints: {}",
                    violations.join("; ")
                )));
            }
            warn!(violations = ?violations, "Rewrite accepted despite contract violations");
        }
        Ok(rewrite)
    }

    /// Rewrite `article` and persist the result with `processed = true`.
    #[instrument(level = "info", skip_all, fields(article = %article.id))]
    pub async fn rewrite(
        &self,
        repo: &Repository,
        article: &Article,
    ) -> Result<Rewrite, ProcessError> {
        let keywords = article.keywords.as_deref().unwrap_or_default();
        let rewrite = self
            .generate(&article.title, &article.content, keywords)
            .await?;

        repo.update_article(
            &article.id,
            &ArticlePatch {
                title: Some(rewrite.title.clone()),
                excerpt: Some(rewrite.description.clone()),
                content: Some(rewrite.article.clone()),
                keywords: Some(rewrite.keyword_list()),
                category: Some(rewrite.category.clone()),
                processed: Some(true),
                ..Default::default()
            },
        )
        .await?;
        info!(title = %rewrite.title, category = %rewrite.category, "Article rewritten");
        Ok(rewrite)
    }
}
