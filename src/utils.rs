//! Text helpers shared by the extractors and the LLM stages.
//!
//! This module provides:
//! - String truncation for logging and for bounded model prompts
//! - Whitespace normalisation and word/paragraph counting
//! - HTML-to-text flattening of extracted article bodies
//! - JSON error detection for handling truncated model output
//! - File system validation for the store directory

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

static PARAGRAPH: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, li, h1, h2, h3, h4, blockquote, pre").expect("static selector"));

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes (backed off to the nearest
/// character boundary) with an ellipsis and byte count indicator appended.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of bytes to keep
///
/// # Returns
///
/// The original string if shorter than `max`, otherwise a truncated version
/// with `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When a model response is cut off (stream dropped, token limit), the
/// accumulated JSON fails to parse with an EOF error.
///
/// # Arguments
///
/// * `e` - The serde_json error to classify
///
/// # Returns
///
/// `true` if the error is an EOF (end-of-file) error, indicating truncation.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of whitespace-separated words.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(word_count("  two  words "), 2);
/// ```
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Non-empty paragraphs separated by blank lines.
pub fn paragraphs(s: &str) -> Vec<&str> {
    s.split("\n\n")
        .flat_map(|block| block.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Flatten an HTML fragment to plain text.
///
/// Block elements become paragraphs separated by a blank line. Fragments
/// without block markup (including plain text) are whitespace-collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let blocks: Vec<String> = fragment
        .select(&PARAGRAPH)
        .filter(|el| {
            // Only outermost blocks; nested ones are part of their parent's text.
            !el.ancestors()
                .filter_map(scraper::ElementRef::wrap)
                .any(|a| PARAGRAPH.matches(&a))
        })
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect();

    if blocks.is_empty() {
        collapse_whitespace(&fragment.root_element().text().collect::<String>())
    } else {
        blocks.join("\n\n")
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!("Store directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        assert_eq!(truncate_for_log(s, 3), "é…(+8 bytes)");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars(&"x".repeat(2000), 1200).len(), 1200);
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let err = serde_json::from_str::<serde_json::Value>(json_eof).unwrap_err();
        assert!(looks_truncated(&err));

        let syntax = serde_json::from_str::<serde_json::Value>("{]").unwrap_err();
        assert!(!looks_truncated(&syntax));
    }

    #[test]
    fn test_word_and_paragraph_counts() {
        assert_eq!(word_count("  one two\nthree "), 3);
        assert_eq!(paragraphs("a b\n\n\n\nc\n\n  \n\nd"), vec!["a b", "c", "d"]);
    }

    #[test]
    fn test_html_to_text() {
        let html = "<p>First <b>bold</b>\n para.</p><p>Second.</p><div>stray</div>";
        assert_eq!(html_to_text(html), "First bold para.\n\nSecond.");
        assert_eq!(html_to_text("Subscribe now   for more!"), "Subscribe now for more!");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("store/nested");
        ensure_writable_dir(nested.to_str().unwrap()).await.unwrap();
        assert!(nested.is_dir());
    }
}
