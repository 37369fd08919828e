//! Pipeline Driver: bounded, sequential consumers for the two LLM stages.
//!
//! Each stage pulls "the next" matching article from the store, processes
//! it, and repeats up to the requested count. One article is in flight per
//! stage. An article that fails within a batch is not picked again by the
//! same batch, so a persistent failure cannot spin the loop.

use crate::error::StoreError;
use crate::gate::ValidityGate;
use crate::models::Article;
use crate::rewrite::RewriteEngine;
use crate::store::{Filter, Repository};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Result of one article in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Gate said valid, or the rewrite was stored.
    Accepted,
    /// Gate said not valid. Carries the model's message.
    Rejected(String),
    /// Model or store failure; the article keeps its prior state.
    Failed(String),
}

/// Per-article outcomes of one batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// `(article id, outcome)` in processing order.
    pub outcomes: Vec<(String, StageOutcome)>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&StageOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    /// Articles processed in this batch, whatever their outcome.
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Articles the stage accepted.
    pub fn accepted(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Accepted))
    }

    /// Articles the gate judged not to be news.
    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Rejected(_)))
    }

    /// Articles left untouched by a model or store failure.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StageOutcome::Failed(_)))
    }
}

/// Articles the Validity Gate has not judged yet.
pub fn unvalidated_filter() -> Filter {
    Filter::eq("validated", false)
}

/// Articles ready for rewriting.
///
/// # Returns
///
/// A filter matching articles that were validated, judged valid, and not yet
/// processed.
pub fn rewritable_filter() -> Filter {
    Filter::eq("processed", false)
        .and(Filter::eq("validated", true))
        .and(Filter::eq("valid", true))
}

/// Drives the Validity Gate and the Rewrite Engine over stored articles.
///
/// Both stages are sequential. Callers pick the batch size per run.
#[derive(Debug)]
pub struct Pipeline {
    repo: Repository,
    gate: ValidityGate,
    engine: RewriteEngine,
}

impl Pipeline {
    /// Create a pipeline over `repo`.
    ///
    /// # Arguments
    ///
    /// * `repo` - Store holding the articles to process
    /// * `gate` - Validity Gate used by [`Pipeline::validate_batch`]
    /// * `engine` - Rewrite Engine used by [`Pipeline::rewrite_batch`]
    pub fn new(repo: Repository, gate: ValidityGate, engine: RewriteEngine) -> Self {
        Self { repo, gate, engine }
    }

    async fn next(
        &self,
        filter: &Filter,
        attempted: &HashSet<String>,
    ) -> Result<Option<Article>, StoreError> {
        Ok(self
            .repo
            .articles(filter)
            .await?
            .into_iter()
            .find(|a| !attempted.contains(&a.id)))
    }

    /// Run the Validity Gate on up to `count` unvalidated articles.
    #[instrument(level = "info", skip(self))]
    pub async fn validate_batch(&self, count: usize) -> Result<BatchReport, StoreError> {
        let t0 = Instant::now();
        let filter = unvalidated_filter();
        let mut attempted = HashSet::new();
        let mut report = BatchReport::default();

        while report.attempted() < count {
            let Some(article) = self.next(&filter, &attempted).await? else {
                info!("No unvalidated articles left");
                break;
            };
            attempted.insert(article.id.clone());

            let outcome = match self.gate.validate(&self.repo, &article).await {
                Ok(verdict) if verdict.valid => StageOutcome::Accepted,
                Ok(verdict) => {
                    info!(article = %article.id, message = %verdict.message, "Article rejected by gate");
                    StageOutcome::Rejected(verdict.message)
                }
                Err(e) => {
                    error!(article = %article.id, error = %e, "Validity gate failed; skipping article");
                    StageOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.push((article.id, outcome));
        }

        info!(
            attempted = report.attempted(),
            valid = report.accepted(),
            invalid = report.rejected(),
            failed = report.failed(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Validation batch finished"
        );
        Ok(report)
    }

    /// Run the Rewrite Engine on up to `count` valid, unprocessed articles.
    #[instrument(level = "info", skip(self))]
    pub async fn rewrite_batch(&self, count: usize) -> Result<BatchReport, StoreError> {
        let t0 = Instant::now();
        let filter = rewritable_filter();
        let mut attempted = HashSet::new();
        let mut report = BatchReport::default();

        while report.attempted() < count {
            let Some(article) = self.next(&filter, &attempted).await? else {
                info!("No articles waiting for a rewrite");
                break;
            };
            attempted.insert(article.id.clone());

            let outcome = match self.engine.rewrite(&self.repo, &article).await {
                Ok(_) => StageOutcome::Accepted,
                Err(e) => {
                    warn!(article = %article.id, error = %e, "Rewrite failed; article left unprocessed");
                    StageOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.push((article.id, outcome));
        }

        info!(
            attempted = report.attempted(),
            rewritten = report.accepted(),
            failed = report.failed(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Rewrite batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewArticle;
    use crate::testing::{ScriptedModel, memory_repo};
    use serde_json::json;
    use std::sync::Arc;

    async fn seed(repo: &Repository, n: usize, validated: bool, valid: Option<bool>) -> Article {
        repo.create_article(&NewArticle {
            title: format!("Story {n}"),
            authors: "Ana Ruiz".into(),
            thumbnail: "https://cdn.example.com/a.jpg".into(),
            keywords: None,
            content: "<p>Body text.</p>".into(),
            excerpt: String::new(),
            source: "src".into(),
            crawl: format!("crawl-{n}"),
            url: format!("https://example.com/{n}"),
            date: None,
            processed: false,
            valid,
            validated,
            category: None,
        })
        .await
        .unwrap()
    }

    fn pipeline(repo: &Repository, gate: ScriptedModel, writer: ScriptedModel) -> Pipeline {
        Pipeline::new(
            repo.clone(),
            ValidityGate::new(Arc::new(gate), "validator", 0.1),
            RewriteEngine::new(Arc::new(writer), "processor", 0.1),
        )
    }

    fn rewrite_answer() -> String {
        let para = vec!["word"; 60].join(" ");
        json!({
            "title": "A calm morning at the award winning bakery",
            "description": vec!["summary"; 35].join(" "),
            "article": ([para.as_str(), para.as_str(), para.as_str()].join("\n\n")),
            "keywords": ["bakery"],
            "category": "lifestyle"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_validate_batch_respects_count_and_order() {
        let repo = memory_repo();
        let a = seed(&repo, 1, false, None).await;
        let b = seed(&repo, 2, false, None).await;
        seed(&repo, 3, false, None).await;
        let gate = ScriptedModel::new()
            .reply(r#"{"valid": true, "message": "ok"}"#)
            .reply(r#"{"valid": false, "message": "promotional"}"#);

        let report = pipeline(&repo, gate, ScriptedModel::new())
            .validate_batch(2)
            .await
            .unwrap();

        assert_eq!(
            report.outcomes,
            vec![
                (a.id, StageOutcome::Accepted),
                (b.id, StageOutcome::Rejected("promotional".into())),
            ]
        );
        assert_eq!(repo.articles(&unvalidated_filter()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_article_is_not_retried_within_batch() {
        let repo = memory_repo();
        let a = seed(&repo, 1, false, None).await;
        let b = seed(&repo, 2, false, None).await;
        let gate = ScriptedModel::new()
            .reply("not json")
            .reply(r#"{"valid": true, "message": "ok"}"#);

        let report = pipeline(&repo, gate, ScriptedModel::new())
            .validate_batch(5)
            .await
            .unwrap();

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].0, a.id);
        assert_eq!(report.outcomes[1], (b.id, StageOutcome::Accepted));
        assert!(!repo.article(&a.id).await.unwrap().validated);
    }

    #[tokio::test]
    async fn test_rewrite_batch_only_takes_valid_articles() {
        let repo = memory_repo();
        seed(&repo, 1, true, Some(false)).await;
        seed(&repo, 2, false, None).await;
        let ready = seed(&repo, 3, true, Some(true)).await;
        let writer = ScriptedModel::new().reply(rewrite_answer());

        let report = pipeline(&repo, ScriptedModel::new(), writer)
            .rewrite_batch(10)
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![(ready.id.clone(), StageOutcome::Accepted)]);
        assert!(repo.article(&ready.id).await.unwrap().processed);
        assert!(repo.articles(&rewritable_filter()).await.unwrap().is_empty());
    }
}
