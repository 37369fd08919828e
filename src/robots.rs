//! Sitemap discovery through robots.txt.

use crate::error::FetchError;
use crate::fetch::PageFetcher;
use texting_robots::Robot;
use tracing::{info, instrument, warn};
use url::Url;

/// `{scheme}://{host}[:port]/robots.txt` for the origin of `site`.
pub fn robots_url(site: &Url) -> Result<Url, FetchError> {
    site.join("/robots.txt").map_err(|e| FetchError::InvalidUrl {
        url: site.to_string(),
        reason: e.to_string(),
    })
}

/// Sitemap URLs declared in a robots.txt body, in file order.
///
/// Falls back to a line scan if the file does not parse as robots.txt.
pub fn sitemaps_from_robots(user_agent: &str, body: &str) -> Vec<String> {
    match Robot::new(user_agent, body.as_bytes()) {
        Ok(robot) => robot.sitemaps,
        Err(e) => {
            warn!(error = %e, "robots.txt did not parse; scanning for Sitemap lines");
            body.lines()
                .filter_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim()
                        .eq_ignore_ascii_case("sitemap")
                        .then(|| value.trim().to_string())
                })
                .filter(|url| !url.is_empty())
                .collect()
        }
    }
}

/// Fetch robots.txt for the site origin and return the sitemaps it lists.
///
/// A robots.txt that does not exist (any non-retryable HTTP status) lists no
/// sitemaps. Network failures that survive the retry policy are returned.
#[instrument(level = "info", skip(fetcher), fields(site = %site))]
pub async fn discover_sitemaps(
    fetcher: &dyn PageFetcher,
    site: &Url,
    user_agent: &str,
) -> Result<Vec<Url>, FetchError> {
    let robots = robots_url(site)?;
    let body = match fetcher.fetch_text(robots.as_str()).await {
        Ok(body) => body,
        Err(FetchError::Status { status, .. }) => {
            info!(status, "No robots.txt available");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let sitemaps: Vec<Url> = sitemaps_from_robots(user_agent, &body)
        .into_iter()
        .filter_map(|raw| match robots.join(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(sitemap = %raw, error = %e, "Skipping unparseable sitemap URL");
                None
            }
        })
        .collect();
    info!(count = sitemaps.len(), "Sitemaps listed in robots.txt");
    Ok(sitemaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robots_url_uses_origin() {
        let site = Url::parse("https://example.com/news/world?x=1").unwrap();
        assert_eq!(
            robots_url(&site).unwrap().as_str(),
            "https://example.com/robots.txt"
        );
    }

    #[test]
    fn test_sitemaps_listed_in_order() {
        let body = "User-agent: *\nDisallow: /private\n\nSitemap: https://example.com/news.xml\nsitemap: https://example.com/index.xml\n";
        assert_eq!(
            sitemaps_from_robots("Mozilla/5.0", body),
            vec![
                "https://example.com/news.xml".to_string(),
                "https://example.com/index.xml".to_string()
            ]
        );
    }

    #[test]
    fn test_no_sitemaps() {
        let body = "User-agent: *\nAllow: /\n";
        assert!(sitemaps_from_robots("Mozilla/5.0", body).is_empty());
    }
}
