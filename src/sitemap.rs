//! Sitemap XML parsing.
//!
//! A sitemap is either an *index* (`<sitemapindex>` of `<sitemap><loc>`
//! children pointing at more sitemaps) or a *urlset* (`<urlset>` of
//! `<url><loc>` page entries). Entries keep document order, which is the
//! order the crawler visits them in.
//!
//! Namespaced extensions are matched on local names relative to their
//! parent, so `<image:loc>` inside a `<url>` never shadows the page `<loc>`,
//! and the Google News `<news:title>` is picked up when present.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt;

/// Parsed sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapDocument {
    /// Child sitemap URLs.
    Index(Vec<String>),
    /// Page entries.
    UrlSet(Vec<UrlEntry>),
}

/// One `<url>` of a urlset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UrlEntry {
    /// Page URL, trimmed.
    pub loc: String,
    pub lastmod: Option<String>,
    /// `<news:title>` of a Google News sitemap entry.
    pub news_title: Option<String>,
}

/// The document is absent, not XML, or not a sitemap.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedSitemap(pub String);

impl fmt::Display for MalformedSitemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MalformedSitemap {}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Index,
    UrlSet,
}

fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    }
}

fn resolve_reference(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = name.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    predefined_entity(name)
}

fn utf8(bytes: &[u8]) -> Result<&str, MalformedSitemap> {
    std::str::from_utf8(bytes).map_err(|e| MalformedSitemap(format!("invalid UTF-8: {e}")))
}

/// Parse a sitemap or sitemap index.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, MalformedSitemap> {
    let body = xml.trim_start_matches('\u{feff}').trim();
    if body.is_empty() {
        return Err(MalformedSitemap("empty document".to_string()));
    }

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut kind: Option<Kind> = None;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut children: Vec<String> = Vec::new();
    let mut entries: Vec<UrlEntry> = Vec::new();
    let mut current = UrlEntry::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = utf8(e.local_name().as_ref())?.to_string();
                if path.is_empty() {
                    kind = Some(root_kind(&name)?);
                }
                if kind == Some(Kind::UrlSet) && name == "url" && path.len() == 1 {
                    current = UrlEntry::default();
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if path.is_empty() {
                    let name = utf8(e.local_name().as_ref())?.to_string();
                    kind = Some(root_kind(&name)?);
                }
            }
            Ok(Event::Text(t)) => {
                let raw = utf8(&t)?;
                let unescaped = quick_xml::escape::unescape(raw)
                    .map_err(|e| MalformedSitemap(format!("bad escape: {e}")))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) => text.push_str(utf8(&c)?),
            Ok(Event::GeneralRef(r)) => {
                let name = utf8(&r)?;
                match resolve_reference(name) {
                    Some(ch) => text.push(ch),
                    None => {
                        return Err(MalformedSitemap(format!("unknown entity &{name};")));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(MalformedSitemap("unbalanced closing tag".to_string()));
                };
                let parent = path.last().map(String::as_str);
                let value = text.trim();
                match (kind, parent, name.as_str()) {
                    (Some(Kind::Index), Some("sitemap"), "loc") if !value.is_empty() => {
                        children.push(value.to_string());
                    }
                    (Some(Kind::UrlSet), Some("url"), "loc") => current.loc = value.to_string(),
                    (Some(Kind::UrlSet), Some("url"), "lastmod") if !value.is_empty() => {
                        current.lastmod = Some(value.to_string());
                    }
                    (Some(Kind::UrlSet), Some("news"), "title") if !value.is_empty() => {
                        current.news_title = Some(value.to_string());
                    }
                    (Some(Kind::UrlSet), Some("urlset"), "url") => {
                        if !current.loc.is_empty() {
                            entries.push(std::mem::take(&mut current));
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MalformedSitemap(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            Ok(_) => {}
        }
    }

    match kind {
        Some(Kind::Index) => Ok(SitemapDocument::Index(children)),
        Some(Kind::UrlSet) => Ok(SitemapDocument::UrlSet(entries)),
        None => Err(MalformedSitemap("no root element".to_string())),
    }
}

fn root_kind(name: &str) -> Result<Kind, MalformedSitemap> {
    match name {
        "sitemapindex" => Ok(Kind::Index),
        "urlset" => Ok(Kind::UrlSet),
        other => Err(MalformedSitemap(format!(
            "root element <{other}> is neither <sitemapindex> nor <urlset>"
        ))),
    }
}
