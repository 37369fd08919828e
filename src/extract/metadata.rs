//! Generic page-metadata heuristic.
//!
//! Every field is read from an ordered chain of sources (Open Graph,
//! Twitter cards, plain `<meta>`, `itemprop`, well-known markup) and the
//! first non-empty value wins. This is the only extractor that produces a
//! hero image.

use super::{clean_byline, element_text, first_attr, first_text, render_paragraphs, selectors};
use crate::utils::truncate_chars;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const EXCERPT_CHARS: usize = 200;

static TITLE_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="og:title"]"#,
        r#"meta[name="twitter:title"]"#,
        r#"meta[name="title"]"#,
    ])
});
static TITLE_TEXT: Lazy<Vec<Selector>> = Lazy::new(|| selectors(&["h1", "title"]));
static AUTHOR_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[name="author"]"#,
        r#"meta[name="byl"]"#,
        r#"meta[name="sailthru.author"]"#,
        r#"meta[property="article:author"]"#,
    ])
});
static AUTHOR_TEXT: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"[rel="author"]"#,
        r#"[itemprop~="author"] [itemprop="name"]"#,
        r#"[itemprop~="author"]"#,
        ".byline",
        ".author",
    ])
});
static IMAGE_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="og:image"]"#,
        r#"meta[property="og:image:url"]"#,
        r#"meta[name="twitter:image"]"#,
        r#"meta[name="twitter:image:src"]"#,
    ])
});
static IMAGE_LINK: Lazy<Vec<Selector>> = Lazy::new(|| selectors(&[r#"link[rel="image_src"]"#]));
static IMAGE_INLINE: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&["article img[src]", "main img[src]", "img[src]"]));
static DATE_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="date"]"#,
        r#"meta[name="pubdate"]"#,
        r#"meta[name="publishdate"]"#,
        r#"meta[name="DC.date.issued"]"#,
        r#"meta[itemprop="datePublished"]"#,
    ])
});
static DATE_TIME: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&[r#"time[itemprop~="datePublished"]"#, "time[datetime]"]));
static EXCERPT_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[property="og:description"]"#,
        r#"meta[name="description"]"#,
        r#"meta[name="twitter:description"]"#,
    ])
});
static CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"[itemprop~="articleBody"]"#,
        "article",
        ".article-body, .article-content, .story-body, .entry-content, .post-content",
        "main",
        "#content, .content",
        "body",
    ])
});
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));

/// Output of the metadata pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    /// Title metatags, then `<title>`.
    pub title: String,
    /// `<p>` HTML of the main container.
    pub content: String,
    pub excerpt: String,
    pub author: String,
    /// Image metatags, then an inline `<img>`, resolved against the page URL.
    pub lead_image_url: Option<String>,
    /// Raw publish time string, unparsed.
    pub date_published: Option<String>,
}

/// Metadata pass over a page.
///
/// Reads the usual meta tags first and falls back to the page body.
///
/// # Arguments
///
/// * `html` - Raw page HTML
/// * `page_url` - Base for resolving a relative lead image, if known
///
/// # Returns
///
/// A [`PageMetadata`] whose missing fields are empty or `None`.
pub fn parse(html: &str, page_url: Option<&Url>) -> PageMetadata {
    let doc = Html::parse_document(html);

    let paragraphs = container(&doc).map(container_paragraphs).unwrap_or_default();
    let excerpt = first_attr(&doc, &EXCERPT_META, "content")
        .or_else(|| {
            paragraphs
                .first()
                .map(|p| truncate_chars(p, EXCERPT_CHARS).to_string())
        })
        .unwrap_or_default();

    PageMetadata {
        title: first_attr(&doc, &TITLE_META, "content")
            .or_else(|| first_text(&doc, &TITLE_TEXT))
            .unwrap_or_default(),
        content: render_paragraphs(&paragraphs),
        excerpt,
        author: author(&doc),
        lead_image_url: lead_image(&doc, page_url),
        date_published: first_attr(&doc, &DATE_META, "content")
            .or_else(|| first_attr(&doc, &DATE_TIME, "datetime")),
    }
}

fn author(doc: &Html) -> String {
    let from_meta = first_attr(doc, &AUTHOR_META, "content")
        // article:author is frequently a profile URL rather than a name
        .filter(|value| !value.starts_with("http"));
    from_meta
        .or_else(|| first_text(doc, &AUTHOR_TEXT))
        .map(|raw| clean_byline(&raw))
        .unwrap_or_default()
}

fn lead_image(doc: &Html, page_url: Option<&Url>) -> Option<String> {
    let raw = first_attr(doc, &IMAGE_META, "content")
        .or_else(|| first_attr(doc, &IMAGE_LINK, "href"))
        .or_else(|| first_attr(doc, &IMAGE_INLINE, "src"))?;
    match page_url {
        Some(base) => base.join(&raw).ok().map(String::from),
        None => Some(raw),
    }
}

fn container(doc: &Html) -> Option<ElementRef<'_>> {
    CONTAINERS.iter().find_map(|selector| {
        doc.select(selector)
            .find(|el| el.select(&PARAGRAPH).next().is_some())
    })
}

fn container_paragraphs(el: ElementRef<'_>) -> Vec<String> {
    el.select(&PARAGRAPH)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_chains() {
        let html = r#"<html><head>
            <title>Fallback title</title>
            <meta name="twitter:title" content="Card title">
            <meta property="article:author" content="https://example.com/staff/lee">
            <meta name="twitter:image" content="https://cdn.example.com/hero.png">
            <meta name="pubdate" content="2026-10-16">
        </head><body>
            <article><p>First paragraph of the story.</p><p>Second.</p></article>
            <span class="byline">By Lee Chen</span>
        </body></html>"#;
        let meta = parse(html, None);
        assert_eq!(meta.title, "Card title");
        assert_eq!(meta.author, "Lee Chen");
        assert_eq!(meta.lead_image_url.as_deref(), Some("https://cdn.example.com/hero.png"));
        assert_eq!(meta.date_published.as_deref(), Some("2026-10-16"));
        assert_eq!(meta.excerpt, "First paragraph of the story.");
        assert_eq!(
            meta.content,
            "<p>First paragraph of the story.</p>\n<p>Second.</p>"
        );
    }

    #[test]
    fn test_inline_image_resolved_against_page() {
        let html = r#"<html><body><main><img src="../photos/a.jpg"><p>x</p></main></body></html>"#;
        let page = Url::parse("https://example.com/news/2026/story").unwrap();
        assert_eq!(
            parse(html, Some(&page)).lead_image_url.as_deref(),
            Some("https://example.com/news/photos/a.jpg")
        );
    }

    #[test]
    fn test_time_element_date() {
        let html = r#"<html><body><time datetime="2026-10-18T07:00:00Z">Today</time></body></html>"#;
        assert_eq!(
            parse(html, None).date_published.as_deref(),
            Some("2026-10-18T07:00:00Z")
        );
    }

    #[test]
    fn test_missing_everything() {
        let meta = parse("<html></html>", None);
        assert_eq!(meta, PageMetadata::default());
    }
}
