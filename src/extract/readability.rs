//! DOM readability heuristic.
//!
//! Paragraph-like blocks (`p`, `pre`, `td`) are scored by length and comma
//! count. Each score is credited to the block's parent in full and to its
//! grandparent at half weight. A candidate container starts from a tag base
//! score plus a class/id weight, and its final score is scaled by
//! `1 - link_density`. The best container's paragraphs form the body.
//!
//! Blocks inside containers whose class or id looks like chrome (sidebar,
//! footer, comments, newsletter prompts) are never scored.

use super::{clean_byline, element_text, first_attr, render_paragraphs, selectors};
use crate::utils::{collapse_whitespace, word_count};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Blocks shorter than this carry no signal.
const MIN_BLOCK_CHARS: usize = 25;
const TITLE_SEPARATORS: [&str; 7] = [" | ", " - ", " – ", " — ", " :: ", " » ", " / "];

static UNLIKELY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)-ad-|ai2html|banner|breadcrumbs|combx|comment|community|cover-wrap|disqus|extra|footer|gdpr|header|legends|menu|related|remark|replies|rss|shoutbox|sidebar|skyscraper|social|sponsor|supplemental|ad-break|agegate|pagination|pager|popup|yom-remote|newsletter|subscribe|promo",
    )
    .expect("static regex")
});
static MAYBE_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)and|article|body|column|content|main|shadow").expect("static regex"));
static POSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story")
        .expect("static regex")
});
static NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)-ad-|hidden|^hid$| hid$| hid |^hid |banner|combx|comment|com-|contact|foot|footnote|gdpr|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget|newsletter|subscribe",
    )
    .expect("static regex")
});
static BYLINE_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)byline|author|dateline|writtenby|p-author").expect("static regex"));

static SCORABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("p, pre, td").expect("static selector"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p, pre").expect("static selector"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("static selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("head > title, title").expect("static selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("static selector"));
static BYLINE_CANDIDATE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[rel="author"], [itemprop], [class], [id]"#).expect("static selector")
});
static BYLINE_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[name="author"]"#,
        r#"meta[name="dc:creator"]"#,
        r#"meta[name="parsely-author"]"#,
    ])
});
static EXCERPT_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="og:description"]"#,
        r#"meta[name="description"]"#,
        r#"meta[name="twitter:description"]"#,
    ])
});
static PUBLISHED_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="parsely-pub-date"]"#,
    ])
});

/// Output of the readability pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadabilityArticle {
    pub title: String,
    pub byline: String,
    /// `<p>` HTML of the winning container.
    pub content: String,
    pub excerpt: String,
    /// Raw publish time string, unparsed.
    pub published_time: Option<String>,
}

/// Readability pass over a page.
///
/// Scores block containers by the text of their paragraphs and keeps the
/// best one.
///
/// # Arguments
///
/// * `html` - Raw page HTML
///
/// # Returns
///
/// A [`ReadabilityArticle`]; `content` is empty when no container scored.
pub fn parse(html: &str) -> ReadabilityArticle {
    let doc = Html::parse_document(html);

    let paragraphs = top_candidate(&doc).map(candidate_paragraphs).unwrap_or_default();
    let excerpt = first_attr(&doc, &EXCERPT_META, "content")
        .or_else(|| paragraphs.first().cloned())
        .unwrap_or_default();

    ReadabilityArticle {
        title: article_title(&doc),
        byline: byline(&doc),
        content: render_paragraphs(&paragraphs),
        excerpt,
        published_time: first_attr(&doc, &PUBLISHED_META, "content"),
    }
}

fn article_title(doc: &Html) -> String {
    let raw = doc.select(&TITLE).next().map(element_text).unwrap_or_default();
    if raw.is_empty() {
        return doc.select(&H1).next().map(element_text).unwrap_or_default();
    }

    let cut = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| raw.rfind(sep))
        .max();
    match cut {
        Some(idx) => {
            let head = raw[..idx].trim();
            if word_count(head) >= 3 {
                head.to_string()
            } else {
                raw
            }
        }
        None => raw,
    }
}

fn byline(doc: &Html) -> String {
    for el in doc.select(&BYLINE_CANDIDATE) {
        let value = el.value();
        let is_author_rel = value.attr("rel") == Some("author");
        let is_author_prop = value
            .attr("itemprop")
            .is_some_and(|p| p.split_whitespace().any(|t| t == "author"));
        let signature = format!(
            "{} {}",
            value.attr("class").unwrap_or_default(),
            value.id().unwrap_or_default()
        );
        if !(is_author_rel || is_author_prop || BYLINE_HINT.is_match(&signature)) {
            continue;
        }
        let text = clean_byline(&el.text().collect::<String>());
        if !text.is_empty() && text.chars().count() < 100 {
            return text;
        }
    }
    first_attr(doc, &BYLINE_META, "content")
        .map(|raw| clean_byline(&raw))
        .unwrap_or_default()
}

fn signature(el: &ElementRef<'_>) -> String {
    format!(
        "{} {}",
        el.value().attr("class").unwrap_or_default(),
        el.value().id().unwrap_or_default()
    )
}

fn is_unlikely(el: &ElementRef<'_>) -> bool {
    let name = el.value().name();
    if name == "body" || name == "article" || name == "html" {
        return false;
    }
    let sig = signature(el);
    !sig.trim().is_empty() && UNLIKELY.is_match(&sig) && !MAYBE_CANDIDATE.is_match(&sig)
}

fn base_tag_score(name: &str) -> f64 {
    match name {
        "div" | "article" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    }
}

fn class_weight(el: &ElementRef<'_>) -> f64 {
    let value = el.value();
    [value.attr("class"), value.id()]
        .into_iter()
        .flatten()
        .map(|attr| {
            let mut weight = 0.0;
            if NEGATIVE.is_match(attr) {
                weight -= 25.0;
            }
            if POSITIVE.is_match(attr) {
                weight += 25.0;
            }
            weight
        })
        .sum()
}

fn link_density(el: ElementRef<'_>) -> f64 {
    let total = element_text(el).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .select(&LINK)
        .map(|a| element_text(a).chars().count())
        .sum();
    linked as f64 / total as f64
}

fn top_candidate(doc: &Html) -> Option<ElementRef<'_>> {
    let mut candidates: Vec<(ElementRef<'_>, f64)> = Vec::new();

    for block in doc.select(&SCORABLE) {
        if block
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| is_unlikely(&a))
        {
            continue;
        }
        let text = element_text(block);
        let chars = text.chars().count();
        if chars < MIN_BLOCK_CHARS {
            continue;
        }
        let score = 1.0 + text.matches(',').count() as f64 + (chars / 100).min(3) as f64;

        let lineage = block
            .ancestors()
            .filter_map(ElementRef::wrap)
            .filter(|a| a.value().name() != "html")
            .take(2);
        for (level, ancestor) in lineage.enumerate() {
            let share = if level == 0 { score } else { score / 2.0 };
            match candidates.iter_mut().find(|(el, _)| *el == ancestor) {
                Some((_, total)) => *total += share,
                None => candidates.push((
                    ancestor,
                    base_tag_score(ancestor.value().name()) + class_weight(&ancestor) + share,
                )),
            }
        }
    }

    candidates
        .into_iter()
        .map(|(el, score)| (el, score * (1.0 - link_density(el))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(el, _)| el)
}

fn candidate_paragraphs(top: ElementRef<'_>) -> Vec<String> {
    let paragraphs: Vec<String> = top
        .select(&PARAGRAPH)
        .filter(|p| {
            let chars = element_text(*p).chars().count();
            chars > 0 && (link_density(*p) < 0.25 || chars > 80)
        })
        .filter(|p| {
            // Chrome nested inside the winning container.
            !p.ancestors()
                .filter_map(ElementRef::wrap)
                .take_while(|a| *a != top)
                .any(|a| is_unlikely(&a))
        })
        .map(element_text)
        .collect();

    if paragraphs.is_empty() {
        let text = collapse_whitespace(&top.text().collect::<String>());
        if text.is_empty() { Vec::new() } else { vec![text] }
    } else {
        paragraphs
    }
}
