//! schema.org structured data: JSON-LD and microdata.
//!
//! Every typed node found on the page becomes a [`SchemaRecord`], JSON-LD
//! first and then microdata, each in document order. A record is *usable*
//! when its type is in [`ACCEPTED_TYPES`] and it carries all of
//! [`REQUIRED_PROPERTIES`]. [`StructuredData::news_article`] returns the
//! first usable record whose `datePublished` falls inside the recency
//! window.

use super::{element_text, first_attr, parse_published, selectors};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

/// schema.org types that count as an article.
pub const ACCEPTED_TYPES: [&str; 13] = [
    "Blog",
    "Article",
    "NewsArticle",
    "TechArticle",
    "BlogPosting",
    "ScholarlyArticle",
    "Report",
    "AnalysisNewsArticle",
    "OpinionNewsArticle",
    "AskPublicNewsArticle",
    "BackgroundNewsArticle",
    "ReportageNewsArticle",
    "ReviewNewsArticle",
];

/// Properties a record needs to be usable.
pub const REQUIRED_PROPERTIES: [&str; 5] = [
    "headline",
    "datePublished",
    "keywords",
    "inLanguage",
    "thumbnailUrl",
];

static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script[type]").expect("static selector"));
static ITEMSCOPE: Lazy<Selector> = Lazy::new(|| Selector::parse("[itemscope]").expect("static selector"));
static PRIMARY_IMAGE: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"meta[itemprop="primaryImageOfPage"]"#,
        r#"meta[name="primaryImageOfPage"]"#,
        r#"meta[property="primaryImageOfPage"]"#,
    ])
});
static PRIMARY_IMAGE_LINK: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&[r#"link[itemprop="primaryImageOfPage"]"#]));

/// `https://schema.org/NewsArticle` and `schema:NewsArticle` are `NewsArticle`.
fn short_type(raw: &str) -> &str {
    raw.trim()
        .trim_end_matches('/')
        .rsplit(|c: char| c == '/' || c == '#' || c == ':')
        .next()
        .unwrap_or_default()
}

fn types_of(value: &Value) -> Vec<String> {
    let raw: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(short_type)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// First scalar text in a value (arrays yield their first usable element).
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(text_of),
        _ => None,
    }
}

/// URL of a string, an `ImageObject` or a list of either.
fn url_of(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => ["url", "contentUrl"]
            .iter()
            .find_map(|key| map.get(*key).and_then(text_of)),
        Value::Array(items) => items.iter().find_map(url_of),
        other => text_of(other),
    }
}

fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => map.get("name").and_then(text_of),
        _ => None,
    }
}

/// One typed schema.org node.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRecord {
    types: Vec<String>,
    properties: Map<String, Value>,
}

impl SchemaRecord {
    /// `None` for nodes without `@type`.
    pub fn from_node(properties: Map<String, Value>) -> Option<Self> {
        let types = properties.get("@type").map(types_of).unwrap_or_default();
        if types.is_empty() {
            return None;
        }
        Some(Self { types, properties })
    }

    /// Every `@type` of the node.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Property value, treating `null` as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn is_accepted_type(&self) -> bool {
        self.types
            .iter()
            .any(|t| ACCEPTED_TYPES.contains(&t.as_str()))
    }

    pub fn missing_properties(&self) -> Vec<&'static str> {
        REQUIRED_PROPERTIES
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none())
            .collect()
    }

    /// Accepted type with every required property present.
    pub fn is_usable(&self) -> bool {
        self.is_accepted_type() && self.missing_properties().is_empty()
    }

    /// `headline` as text.
    pub fn headline(&self) -> Option<String> {
        self.get("headline").and_then(text_of)
    }

    pub fn description(&self) -> Option<String> {
        self.get("description").and_then(text_of)
    }

    /// `datePublished`, parsed. `None` if it is missing or unparseable.
    pub fn date_published(&self) -> Option<DateTime<Utc>> {
        self.get("datePublished")
            .and_then(text_of)
            .and_then(|raw| parse_published(&raw))
    }

    /// `articleBody`, unless absent or the literal `"undefined"`.
    pub fn article_body(&self) -> Option<String> {
        self.get("articleBody")
            .and_then(text_of)
            .filter(|body| body != "undefined")
    }

    /// `author` as a string, a list of names joined with ", ", or a single
    /// object's `name`.
    pub fn authors(&self) -> Option<String> {
        let joined = match self.get("author")? {
            Value::Array(items) => items
                .iter()
                .filter_map(name_of)
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            other => name_of(other)?,
        };
        Some(joined).filter(|s| !s.trim().is_empty())
    }

    /// `keywords` as-is, or a list joined with ", ".
    pub fn keywords(&self) -> Option<String> {
        let joined = match self.get("keywords")? {
            Value::Array(items) => items
                .iter()
                .filter_map(text_of)
                .collect::<Vec<_>>()
                .join(", "),
            other => text_of(other)?,
        };
        Some(joined).filter(|s| !s.trim().is_empty())
    }

    /// `thumbnail`, then `thumbnailUrl`.
    pub fn thumbnail(&self) -> Option<String> {
        self.get("thumbnail")
            .and_then(url_of)
            .or_else(|| self.get("thumbnailUrl").and_then(url_of))
    }

    /// `image.contentUrl`, `image.url`, then `associatedMedia.url`.
    pub fn media_image(&self) -> Option<String> {
        let image = self.get("image");
        image
            .and_then(|img| img_field(img, "contentUrl"))
            .or_else(|| image.and_then(|img| img_field(img, "url")))
            .or_else(|| image.and_then(|img| img.as_str().map(str::to_string)))
            .or_else(|| self.get("associatedMedia").and_then(|m| img_field(m, "url")))
    }
}

fn img_field(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => map.get(key).and_then(text_of),
        Value::Array(items) => items.iter().find_map(|item| img_field(item, key)),
        _ => None,
    }
}

/// Verdict for "does this page carry a recent, accepted news record".
#[derive(Debug, Clone, PartialEq)]
pub enum NewsVerdict {
    Recent(SchemaRecord),
    /// Usable records exist but none was published inside the window.
    Stale { published: Option<DateTime<Utc>> },
    NotFound,
}

impl NewsVerdict {
    /// The record of a [`NewsVerdict::Recent`] verdict.
    pub fn into_record(self) -> Option<SchemaRecord> {
        match self {
            NewsVerdict::Recent(record) => Some(record),
            _ => None,
        }
    }
}

/// All structured data found on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredData {
    pub records: Vec<SchemaRecord>,
    /// `primaryImageOfPage` metatag, if present.
    pub primary_image: Option<String>,
}

impl StructuredData {
    /// Usable records in document order.
    pub fn usable(&self) -> impl Iterator<Item = &SchemaRecord> {
        self.records.iter().filter(|r| r.is_usable())
    }

    /// Pick the first usable record published inside `window`.
    ///
    /// # Arguments
    ///
    /// * `now` - Reference time, injected so tests are deterministic
    /// * `window` - Maximum age of `datePublished`
    ///
    /// # Returns
    ///
    /// [`NewsVerdict::Recent`] with the record, [`NewsVerdict::Stale`] if only
    /// older usable records exist, [`NewsVerdict::NotFound`] otherwise.
    pub fn news_article(&self, now: DateTime<Utc>, window: Duration) -> NewsVerdict {
        let cutoff = now - window;
        let mut first_stale = None;
        for record in self.usable() {
            match record.date_published() {
                Some(published) if published >= cutoff => {
                    return NewsVerdict::Recent(record.clone());
                }
                published => {
                    if first_stale.is_none() {
                        first_stale = Some(published);
                    }
                }
            }
        }
        match first_stale {
            Some(published) => NewsVerdict::Stale { published },
            None => NewsVerdict::NotFound,
        }
    }
}

/// Collect JSON-LD and microdata records from a page.
///
/// JSON-LD arrays and `@graph` members are flattened. Unparseable blocks are
/// skipped. Nested microdata items stay properties of their parent.
pub fn parse_structured(html: &str) -> StructuredData {
    let doc = Html::parse_document(html);

    let mut records = Vec::new();
    for script in doc.select(&SCRIPT) {
        let is_json_ld = script
            .value()
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"));
        if !is_json_ld {
            continue;
        }
        let raw = script.text().collect::<String>();
        let raw = raw
            .trim()
            .trim_start_matches("<!--")
            .trim_end_matches("-->")
            .trim();
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => collect_json_ld(value, &mut records),
            Err(e) => debug!(error = %e, "Skipping unparseable JSON-LD block"),
        }
    }

    for item in doc.select(&ITEMSCOPE) {
        // Nested items are property values of their parent item.
        if item.value().attr("itemprop").is_some() {
            continue;
        }
        if let Some(record) = SchemaRecord::from_node(microdata_item(item)) {
            records.push(record);
        }
    }

    let primary_image = first_attr(&doc, &PRIMARY_IMAGE, "content")
        .or_else(|| first_attr(&doc, &PRIMARY_IMAGE_LINK, "href"));

    StructuredData {
        records,
        primary_image,
    }
}

fn collect_json_ld(value: Value, out: &mut Vec<SchemaRecord>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_json_ld(item, out);
            }
        }
        Value::Object(mut map) => {
            let graph = map.remove("@graph");
            if let Some(record) = SchemaRecord::from_node(map) {
                out.push(record);
            }
            if let Some(graph) = graph {
                collect_json_ld(graph, out);
            }
        }
        _ => {}
    }
}

fn microdata_item(scope: ElementRef<'_>) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(itemtype) = scope.value().attr("itemtype") {
        let types: Vec<Value> = itemtype
            .split_whitespace()
            .map(|t| Value::String(t.to_string()))
            .collect();
        map.insert("@type".to_string(), Value::Array(types));
    }
    collect_microdata_properties(scope, &mut map);
    map
}

fn collect_microdata_properties(scope: ElementRef<'_>, map: &mut Map<String, Value>) {
    for child in scope.children().filter_map(ElementRef::wrap) {
        let is_scope = child.value().attr("itemscope").is_some();
        if let Some(names) = child.value().attr("itemprop") {
            let value = if is_scope {
                Value::Object(microdata_item(child))
            } else {
                Value::String(microdata_value(child))
            };
            for name in names.split_whitespace() {
                insert_repeated(map, name, value.clone());
            }
        }
        if !is_scope {
            collect_microdata_properties(child, map);
        }
    }
}

fn microdata_value(el: ElementRef<'_>) -> String {
    let value = el.value();
    let attr = match value.name() {
        "meta" => value.attr("content"),
        "a" | "area" | "link" => value.attr("href"),
        "img" | "audio" | "video" | "source" | "iframe" | "embed" | "track" => value.attr("src"),
        "object" => value.attr("data"),
        "time" => value.attr("datetime"),
        "data" | "meter" => value.attr("value"),
        _ => None,
    };
    match attr {
        Some(v) => v.trim().to_string(),
        None => element_text(el),
    }
}

/// A repeated property becomes an array.
fn insert_repeated(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn news_json(date: &str) -> Value {
        json!({
            "@context": "https://schema.org",
            "@type": "NewsArticle",
            "headline": "Local bakery wins award",
            "datePublished": date,
            "keywords": ["bakery", "awards"],
            "inLanguage": "en",
            "thumbnailUrl": "https://example.com/bread.jpg",
            "author": [{"@type": "Person", "name": "Ana Ruiz"}, {"@type": "Person", "name": "Lee Chen"}]
        })
    }

    fn page_with(json: &Value) -> String {
        format!(r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#)
    }

    #[test]
    fn test_recent_news_article_accepted() {
        let data = parse_structured(&page_with(&news_json("2026-10-17T09:00:00Z")));
        let record = data
            .news_article(now(), Duration::days(5))
            .into_record()
            .expect("recent record");
        assert_eq!(record.headline().as_deref(), Some("Local bakery wins award"));
        assert_eq!(record.keywords().as_deref(), Some("bakery, awards"));
        assert_eq!(record.authors().as_deref(), Some("Ana Ruiz, Lee Chen"));
        assert_eq!(record.thumbnail().as_deref(), Some("https://example.com/bread.jpg"));
    }

    #[test]
    fn test_stale_article_rejected() {
        let data = parse_structured(&page_with(&news_json("2026-10-01T09:00:00Z")));
        assert!(matches!(
            data.news_article(now(), Duration::days(5)),
            NewsVerdict::Stale { published: Some(_) }
        ));
    }

    #[test]
    fn test_missing_required_property_is_not_usable() {
        let mut node = news_json("2026-10-17T09:00:00Z");
        node.as_object_mut().unwrap().remove("inLanguage");
        let data = parse_structured(&page_with(&node));
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.records[0].missing_properties(), vec!["inLanguage"]);
        assert_eq!(data.news_article(now(), Duration::days(5)), NewsVerdict::NotFound);
    }

    #[test]
    fn test_unaccepted_type_ignored() {
        let mut node = news_json("2026-10-17T09:00:00Z");
        node["@type"] = json!("Recipe");
        let data = parse_structured(&page_with(&node));
        assert_eq!(data.usable().count(), 0);
    }

    #[test]
    fn test_graph_and_type_lists_flattened() {
        let mut article = news_json("2026-10-17T09:00:00Z");
        article["@type"] = json!(["http://schema.org/ReportageNewsArticle", "Thing"]);
        let graph = json!({
            "@context": "https://schema.org",
            "@graph": [
                {"@type": "WebSite", "name": "Example"},
                article
            ]
        });
        let data = parse_structured(&page_with(&graph));
        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[1].types()[0], "ReportageNewsArticle");
        assert!(data.news_article(now(), Duration::days(5)).into_record().is_some());
    }

    #[test]
    fn test_broken_json_ld_skipped() {
        let html = r#"<script type="application/ld+json">{"@type": "NewsArticle",</script>"#;
        assert!(parse_structured(html).records.is_empty());
    }

    #[test]
    fn test_microdata_item() {
        let html = r#"<html><head>
              <meta itemprop="primaryImageOfPage" content="https://example.com/primary.jpg">
            </head><body>
            <div itemscope itemtype="https://schema.org/NewsArticle">
              <h1 itemprop="headline">Harbor reopens</h1>
              <time itemprop="datePublished" datetime="2026-10-18T06:00:00Z">This morning</time>
              <meta itemprop="keywords" content="harbor, storm">
              <meta itemprop="inLanguage" content="en">
              <link itemprop="thumbnailUrl" href="https://example.com/harbor.jpg">
              <div itemprop="author" itemscope itemtype="https://schema.org/Person">
                <span itemprop="name">Sam Reporter</span>
              </div>
              <div itemprop="articleBody"><p>The harbor reopened.</p></div>
            </div>
        </body></html>"#;
        let data = parse_structured(html);
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.primary_image.as_deref(), Some("https://example.com/primary.jpg"));

        let record = data
            .news_article(now(), Duration::days(5))
            .into_record()
            .expect("microdata record");
        assert_eq!(record.headline().as_deref(), Some("Harbor reopens"));
        assert_eq!(record.authors().as_deref(), Some("Sam Reporter"));
        assert_eq!(record.article_body().as_deref(), Some("The harbor reopened."));
        assert_eq!(record.thumbnail().as_deref(), Some("https://example.com/harbor.jpg"));
    }

    #[test]
    fn test_media_image_chain() {
        let record = SchemaRecord::from_node(
            json!({
                "@type": "Article",
                "image": [{"@type": "ImageObject", "url": "https://example.com/1.jpg"}],
                "associatedMedia": {"url": "https://example.com/2.jpg"}
            })
            .as_object()
            .cloned()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(record.media_image().as_deref(), Some("https://example.com/1.jpg"));
        assert_eq!(record.thumbnail(), None);
    }

    #[test]
    fn test_short_type() {
        assert_eq!(short_type("https://schema.org/NewsArticle"), "NewsArticle");
        assert_eq!(short_type("schema:BlogPosting"), "BlogPosting");
        assert_eq!(short_type("Article"), "Article");
    }
}
