//! Page extraction: article drafts and schema.org structured data.
//!
//! Two independent heuristics produce the draft:
//! - [`readability`]: scores DOM blocks to find the main article container
//! - [`metadata`]: reads `<meta>` chains and well-known containers
//!
//! [`extract_content`] merges them field by field, preferring the DOM
//! result unless it is empty or the literal `"undefined"`. The hero image
//! only ever comes from the metadata heuristic.
//!
//! [`structured`] is the separate schema.org pass used as ground truth by
//! the ingest resolver.
//!
//! Every function here is synchronous: `scraper::Html` is not `Send`, so
//! parsing is kept out of async code and only owned results cross await
//! points.

pub mod metadata;
pub mod readability;
pub mod structured;

use crate::utils::collapse_whitespace;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Best-effort article draft from the page itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentDraft {
    pub title: String,
    /// Body as `<p>` HTML.
    pub content: String,
    pub excerpt: String,
    pub authors: String,
    pub thumbnail: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Run both heuristics over `html` and merge them.
///
/// `page_url` resolves relative image URLs.
pub fn extract_content(html: &str, page_url: Option<&Url>) -> ContentDraft {
    let primary = readability::parse(html);
    let fallback = metadata::parse(html, page_url);

    let published = [
        primary.published_time.as_deref(),
        fallback.date_published.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|raw| !raw.trim().is_empty());

    ContentDraft {
        title: prefer(primary.title, fallback.title),
        content: prefer(primary.content, fallback.content),
        excerpt: prefer(primary.excerpt, fallback.excerpt),
        authors: prefer(primary.byline, fallback.author),
        thumbnail: fallback.lead_image_url,
        date: published.and_then(parse_published),
    }
}

/// Empty or the placeholder string some extractors emit for a missing value.
pub fn is_blank(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "undefined"
}

fn prefer(primary: String, fallback: String) -> String {
    if is_blank(&primary) { fallback } else { primary }
}

/// Parse the publish timestamps found in the wild.
///
/// Accepts RFC 3339, RFC 2822, ISO-like timestamps with or without offset
/// (naive ones are taken as UTC), and bare `YYYY-MM-DD` dates.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Compile a chain of static CSS selectors.
pub(crate) fn selectors(css: &[&str]) -> Vec<Selector> {
    css.iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
}

/// Whitespace-collapsed text of an element and its descendants.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// First non-empty `attr` of the first element matched, trying selectors in order.
pub(crate) fn first_attr(doc: &Html, chain: &[Selector], attr: &str) -> Option<String> {
    chain.iter().find_map(|selector| {
        doc.select(selector).find_map(|el| {
            el.value()
                .attr(attr)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    })
}

/// First non-empty element text, trying selectors in order.
pub(crate) fn first_text(doc: &Html, chain: &[Selector]) -> Option<String> {
    chain.iter().find_map(|selector| {
        doc.select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// Render plain-text paragraphs as escaped `<p>` blocks.
pub(crate) fn render_paragraphs<I, S>(paragraphs: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paragraphs
        .into_iter()
        .map(|p| format!("<p>{}</p>", quick_xml::escape::escape(p.as_ref())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop a leading "By " from a byline.
pub(crate) fn clean_byline(raw: &str) -> String {
    let text = collapse_whitespace(raw);
    let lower = text.to_lowercase();
    if lower.starts_with("by ") {
        text[3..].trim().to_string()
    } else {
        text
    }
}
