//! Main-content extraction from HTML pages.
//!
//! Finds the main content area with readability-style heuristics
//! (`<main>`, `<article>`, `[role=main]`, `.content`, then `<body>`),
//! converts it to Markdown via `htmd` with page chrome skipped, and pulls
//! page metadata from `<head>`.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use harvester_shared::text::collapse_whitespace;
use harvester_shared::{HarvesterError, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Content containers tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &["main", "article", r#"[role="main"]"#, ".content", "body"];

/// Elements dropped from the Markdown output.
const CHROME_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg", "form",
];

/// Text and metadata extracted from a single page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    /// `og:title`, then `<title>`, then the first `<h1>`.
    pub title: Option<String>,
    /// Main content as Markdown.
    pub body: String,
    pub description: Option<String>,
    /// `article:published_time`, when present and RFC 3339.
    pub published_at: Option<DateTime<Utc>>,
    pub canonical_url: Option<String>,
    pub word_count: usize,
}

/// Extract title, metadata and main-content Markdown from `html`.
///
/// Returns an error only if Markdown conversion fails.
pub fn extract_page(html: &str) -> Result<ExtractedPage> {
    let doc = Html::parse_document(html);

    let content_html = main_content(&doc).unwrap_or_default();
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(CHROME_TAGS.to_vec())
        .build();
    let markdown = converter
        .convert(&content_html)
        .map_err(|e| HarvesterError::parse(format!("htmd conversion failed: {e}")))?;
    let body = clean_markdown(&markdown);
    let word_count = body.split_whitespace().count();

    debug!(
        content_len = content_html.len(),
        word_count, "page content extracted"
    );

    Ok(ExtractedPage {
        title: extract_title(&doc),
        body,
        description: meta_content(&doc, r#"meta[name="description"]"#)
            .or_else(|| meta_content(&doc, r#"meta[property="og:description"]"#)),
        published_at: meta_content(&doc, r#"meta[property="article:published_time"]"#)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        canonical_url: first_match(&doc, r#"link[rel="canonical"]"#)
            .and_then(|el| el.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty()),
        word_count,
    })
}

fn main_content(doc: &Html) -> Option<String> {
    CONTENT_SELECTORS
        .iter()
        .find_map(|sel| first_match(doc, sel))
        .map(|el| el.inner_html())
}

fn extract_title(doc: &Html) -> Option<String> {
    meta_content(doc, r#"meta[property="og:title"]"#)
        .or_else(|| element_text(doc, "title"))
        .or_else(|| element_text(doc, "h1"))
}

fn first_match<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let Ok(sel) = Selector::parse(selector) else {
        return None;
    };
    doc.select(&sel).next()
}

fn element_text(doc: &Html, selector: &str) -> Option<String> {
    first_match(doc, selector)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    first_match(doc, selector)
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty())
}

/// Trim trailing whitespace per line and collapse runs of blank lines.
fn clean_markdown(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let trimmed: Vec<&str> = md.lines().map(str::trim_end).collect();
    MULTI_BLANK_RE
        .replace_all(&trimmed.join("\n"), "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    #[test]
    fn extracts_article_fixture() {
        let page = extract_page(&load_fixture("article.html")).unwrap();

        assert_eq!(
            page.title.as_deref(),
            Some("Gut Microbiota and the Brain: A Review")
        );
        assert_eq!(
            page.description.as_deref(),
            Some("How gut bacteria talk to the nervous system.")
        );
        assert_eq!(
            page.canonical_url.as_deref(),
            Some("https://science.example.org/articles/gut-brain")
        );
        assert_eq!(
            page.published_at.map(|d| d.to_rfc3339()),
            Some("2024-03-15T09:30:00+00:00".to_string())
        );

        assert!(page.body.contains("vagus nerve"));
        assert!(page.body.contains("Short-chain fatty acids"));
        // Chrome stripped
        assert!(!page.body.contains("Subscribe to our newsletter"));
        assert!(!page.body.contains("analytics"));
        assert!(page.word_count > 20);
    }

    #[test]
    fn title_falls_back_to_title_then_h1() {
        let html = "<html><head><title> Plain   Title </title></head><body><h1>Heading</h1></body></html>";
        let page = extract_page(html).unwrap();
        assert_eq!(page.title.as_deref(), Some("Plain Title"));

        let html = "<html><body><h1>Only Heading</h1><p>text</p></body></html>";
        let page = extract_page(html).unwrap();
        assert_eq!(page.title.as_deref(), Some("Only Heading"));
    }

    #[test]
    fn prefers_main_over_body() {
        let html = r#"<html><body>
            <div>outside text</div>
            <main><p>inside main</p></main>
        </body></html>"#;
        let page = extract_page(html).unwrap();
        assert!(page.body.contains("inside main"));
        assert!(!page.body.contains("outside text"));
    }

    #[test]
    fn body_fallback_strips_chrome() {
        let html = r#"<html><body>
            <nav><a href="/">Home</a></nav>
            <p>The body paragraph.</p>
            <script>var tracking = 1;</script>
            <footer>Footer links</footer>
        </body></html>"#;
        let page = extract_page(html).unwrap();
        assert!(page.body.contains("The body paragraph."));
        assert!(!page.body.contains("Home"));
        assert!(!page.body.contains("tracking"));
        assert!(!page.body.contains("Footer"));
    }

    #[test]
    fn empty_document_yields_empty_body() {
        let page = extract_page("").unwrap();
        assert!(page.body.is_empty());
        assert_eq!(page.word_count, 0);
        assert!(page.title.is_none());
    }

    #[test]
    fn clean_markdown_collapses_blank_runs() {
        assert_eq!(clean_markdown("a  \n\n\n\nb\n"), "a\n\nb");
    }
}
