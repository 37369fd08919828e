//! Command-line interface definitions for Newswire.
//!
//! Global options can also come from environment variables; everything else
//! defaults to the YAML configuration file.

use clap::{Args, Parser, Subcommand};

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Crawl every configured source
/// newswire crawl --all
///
/// # Gate ten articles, then rewrite five
/// newswire validate --count 10
/// newswire rewrite --count 5
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to the YAML config file (default: ./newswire.yaml)
    #[arg(short, long, env = "NEWSWIRE_CONFIG")]
    pub config: Option<String>,

    /// Directory of the JSON document store (overrides `store_dir`)
    #[arg(long, env = "NEWSWIRE_STORE_DIR")]
    pub store_dir: Option<String>,

    /// OpenAI-compatible API root (overrides `llm.base_url`)
    #[arg(long, env = "NEWSWIRE_LLM_URL")]
    pub llm_url: Option<String>,

    /// API key for the LLM endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the `newswire` binary.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Discover and ingest articles through each source's sitemaps
    Crawl(CrawlArgs),
    /// Register a news site
    AddSource(AddSourceArgs),
    /// Run the validity gate on unvalidated articles
    Validate(BatchArgs),
    /// Rewrite valid, unprocessed articles
    Rewrite(BatchArgs),
    /// Print record counts per collection and pipeline stage
    Status,
}

/// Arguments of `newswire crawl`.
#[derive(Args, Debug, PartialEq)]
pub struct CrawlArgs {
    /// Source ids to crawl
    #[arg(short, long = "source", required_unless_present = "all")]
    pub sources: Vec<String>,

    /// Crawl every source in the store
    #[arg(long, conflicts_with = "sources")]
    pub all: bool,

    /// Override `crawler.article_hard_limit`
    #[arg(long)]
    pub limit: Option<u32>,
}

/// Arguments of `newswire add-source`.
#[derive(Args, Debug, PartialEq)]
pub struct AddSourceArgs {
    /// Display name, also copied onto every crawl record
    #[arg(long)]
    pub name: String,

    /// Site root; robots.txt is looked up at its origin
    #[arg(long)]
    pub url: String,

    /// Logo URL shown next to the source's articles
    #[arg(long, default_value = "")]
    pub logo: String,
}

/// Batch size shared by `validate` and `rewrite`.
#[derive(Args, Debug, PartialEq)]
pub struct BatchArgs {
    /// Number of articles to take
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_sources() {
        let cli = Cli::parse_from(["newswire", "crawl", "-s", "abc", "--source", "def"]);
        assert_eq!(
            cli.command,
            Command::Crawl(CrawlArgs {
                sources: vec!["abc".into(), "def".into()],
                all: false,
                limit: None,
            })
        );
    }

    #[test]
    fn test_crawl_requires_a_target() {
        assert!(Cli::try_parse_from(["newswire", "crawl"]).is_err());
        assert!(Cli::try_parse_from(["newswire", "crawl", "--all", "-s", "x"]).is_err());
        let cli = Cli::parse_from(["newswire", "crawl", "--all", "--limit", "3"]);
        assert!(matches!(cli.command, Command::Crawl(CrawlArgs { all: true, limit: Some(3), .. })));
    }

    #[test]
    fn test_global_options_and_batch_defaults() {
        let cli = Cli::parse_from(["newswire", "--store-dir", "/tmp/store", "validate"]);
        assert_eq!(cli.store_dir.as_deref(), Some("/tmp/store"));
        assert_eq!(cli.command, Command::Validate(BatchArgs { count: 10 }));

        let cli = Cli::parse_from(["newswire", "rewrite", "-n", "3"]);
        assert_eq!(cli.command, Command::Rewrite(BatchArgs { count: 3 }));
    }

    #[test]
    fn test_add_source() {
        let cli = Cli::parse_from([
            "newswire",
            "add-source",
            "--name",
            "Example News",
            "--url",
            "https://example.com",
        ]);
        assert_eq!(
            cli.command,
            Command::AddSource(AddSourceArgs {
                name: "Example News".into(),
                url: "https://example.com".into(),
                logo: String::new(),
            })
        );
    }
}
