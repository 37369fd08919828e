//! # Newswire
//!
//! Command-line driver for the crawl, gate and rewrite pipeline.
//!
//! ## Usage
//!
//! ```sh
//! newswire add-source --name "Example News" --url https://example.com
//! newswire crawl --all
//! newswire validate --count 10
//! newswire rewrite --count 5
//! newswire status
//! ```

use clap::Parser;
use futures::future::join_all;
use newswire::cli::{AddSourceArgs, BatchArgs, Cli, Command, CrawlArgs};
use newswire::config::AppConfig;
use newswire::crawler::supervisor::Supervisor;
use newswire::crawler::CrawlHooks;
use newswire::error::CrawlError;
use newswire::fetch::http_fetcher;
use newswire::gate::ValidityGate;
use newswire::llm::ChatModel;
use newswire::llm::openai::OpenAiClient;
use newswire::llm::retry::RetryModel;
use newswire::models::{CrawlProgress, NewSource};
use newswire::pipeline::{Pipeline, rewritable_filter, unvalidated_filter};
use newswire::rewrite::RewriteEngine;
use newswire::store::json_file::JsonFileStore;
use newswire::store::{Collection, Filter, Repository};
use newswire::utils::ensure_writable_dir;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

/// Logs every progress snapshot of one crawler.
struct LogHooks {
    source: String,
}

impl CrawlHooks for LogHooks {
    fn on_update(&self, progress: &CrawlProgress) {
        debug!(
            source = %self.source,
            status = %progress.status,
            progress = progress.progress,
            errors = progress.errors,
            "Crawl progress"
        );
    }

    fn on_error(&self, error: &CrawlError) {
        warn!(source = %self.source, error = %error, "Crawl error");
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args.command, "Parsed CLI arguments");

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.store_dir {
        config.store_dir = dir;
    }
    if let Some(url) = args.llm_url {
        config.llm.base_url = url;
    }
    if args.api_key.is_some() {
        config.llm.api_key = args.api_key;
    }

    if let Err(e) = ensure_writable_dir(&config.store_dir).await {
        error!(
            path = %config.store_dir,
            error = %e,
            "Store directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }
    let repo = Repository::new(Arc::new(JsonFileStore::open(&config.store_dir).await?));

    match args.command {
        Command::Crawl(crawl) => run_crawl(&config, repo, crawl).await?,
        Command::AddSource(source) => add_source(&repo, source).await?,
        Command::Validate(BatchArgs { count }) => {
            let report = pipeline(&config, repo)?.validate_batch(count).await?;
            println!(
                "validated {}: {} valid, {} invalid, {} failed",
                report.attempted(),
                report.accepted(),
                report.rejected(),
                report.failed()
            );
        }
        Command::Rewrite(BatchArgs { count }) => {
            let report = pipeline(&config, repo)?.rewrite_batch(count).await?;
            println!(
                "rewrote {} of {} attempted, {} failed",
                report.accepted(),
                report.attempted(),
                report.failed()
            );
        }
        Command::Status => print_status(&repo).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn run_crawl(
    config: &AppConfig,
    repo: Repository,
    args: CrawlArgs,
) -> Result<(), Box<dyn Error>> {
    let mut options = config.crawl_options()?;
    if let Some(limit) = args.limit {
        options.article_hard_limit = limit;
    }

    let sources = if args.all {
        repo.sources().await?
    } else {
        let mut picked = Vec::with_capacity(args.sources.len());
        for id in &args.sources {
            picked.push(repo.source(id).await?);
        }
        picked
    };
    if sources.is_empty() {
        warn!("No sources to crawl; add one with `add-source`");
        return Ok(());
    }

    let fetcher = Arc::new(http_fetcher(&options.fetch_options())?);
    let supervisor = Supervisor::new(repo, fetcher, options);

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let hooks = Arc::new(LogHooks {
            source: source.name.clone(),
        });
        match supervisor.start(source, hooks) {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!(error = %e, "Crawler not started"),
        }
    }

    let halter = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; halting crawlers after their current request");
            halter.halt_all();
        }
    });

    for result in join_all(handles.into_iter().map(|h| h.wait())).await {
        match result {
            Ok(report) => {
                info!(
                    source_id = %report.source_id,
                    status = %report.status,
                    ingested = report.ingested,
                    errors = report.errors,
                    sitemaps = report.sitemaps_fetched,
                    halted = report.halted,
                    "Crawl report"
                );
                println!(
                    "{}: {} ({} ingested, {} errors, {} sitemaps fetched{})",
                    report.source_id,
                    report.status,
                    report.ingested,
                    report.errors,
                    report.sitemaps_fetched,
                    if report.halted { ", halted" } else { "" }
                );
            }
            Err(e) => error!(error = %e, "Crawler task failed"),
        }
    }
    Ok(())
}

async fn add_source(repo: &Repository, args: AddSourceArgs) -> Result<(), Box<dyn Error>> {
    let parsed = url::Url::parse(args.url.trim())?;
    let source = repo
        .create_source(&NewSource {
            name: args.name.trim().to_string(),
            url: parsed.to_string(),
            last_crawl: None,
            logo: args.logo,
            articles: vec![],
        })
        .await?;
    info!(id = %source.id, name = %source.name, "Source added");
    println!("{}", source.id);
    Ok(())
}

fn pipeline(config: &AppConfig, repo: Repository) -> Result<Pipeline, Box<dyn Error>> {
    let llm = &config.llm;
    let client = OpenAiClient::new(
        &llm.base_url,
        llm.api_key.as_deref(),
        Duration::from_secs(llm.timeout_secs),
    )?;
    let model: Arc<dyn ChatModel> = Arc::new(RetryModel::new(
        client,
        llm.max_retries,
        Duration::from_millis(llm.retry_base_delay_ms),
    ));

    let gate = ValidityGate::new(model.clone(), llm.validator_model.clone(), llm.temperature);
    let engine = RewriteEngine::new(model, llm.processor_model.clone(), llm.temperature)
        .enforce_constraints(llm.enforce_rewrite_constraints);
    Ok(Pipeline::new(repo, gate, engine))
}

async fn print_status(repo: &Repository) -> Result<(), Box<dyn Error>> {
    for collection in Collection::ALL {
        println!("{:<10} {}", collection.name(), repo.count(collection, &Filter::All).await?);
    }
    let verified = repo
        .count(Collection::Crawls, &Filter::eq("verified", true))
        .await?;
    let unvalidated = repo.count(Collection::Articles, &unvalidated_filter()).await?;
    let valid = repo
        .count(Collection::Articles, &Filter::eq("valid", true))
        .await?;
    let waiting = repo.count(Collection::Articles, &rewritable_filter()).await?;
    let processed = repo
        .count(Collection::Articles, &Filter::eq("processed", true))
        .await?;

    println!("crawls verified          {verified}");
    println!("articles unvalidated     {unvalidated}");
    println!("articles valid           {valid}");
    println!("articles awaiting rewrite {waiting}");
    println!("articles processed       {processed}");
    Ok(())
}
