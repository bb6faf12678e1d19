//! arXiv adapter over the Atom export API.
//!
//! Builds a `search_query` from categories, a quoted phrase and keywords,
//! then pages through results with a polite delay between requests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_shared::text::collapse_whitespace;
use harvester_shared::{
    AcademicConfig, ContentItem, Result, SourceBatch, SourceError, SourceKind, SourceQuery,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{SourceAdapter, mismatched_query};
use crate::http;

// ---------------------------------------------------------------------------
// Atom feed model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@title", default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

/// arXiv reports query errors as a feed with a single entry whose id points
/// at its errors page.
const ERROR_ENTRY_MARKER: &str = "/api/errors";

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for the arXiv paper index.
pub struct ArxivAdapter {
    client: Client,
    base_url: String,
    page_size: usize,
    page_delay: Duration,
    default_categories: Vec<String>,
}

impl ArxivAdapter {
    pub fn new(config: &AcademicConfig, user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: http::build_client(user_agent)?,
            base_url: config.base_url.clone(),
            page_size: config.page_size.max(1),
            page_delay: Duration::from_millis(config.page_delay_ms),
            default_categories: config.default_categories.clone(),
        })
    }

    async fn fetch_page(
        &self,
        search_query: &str,
        start: usize,
        count: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<ContentItem>, SourceError> {
        debug!(start, count, "requesting arXiv page");
        let request = self.client.get(&self.base_url).query(&[
            ("search_query", search_query.to_string()),
            ("start", start.to_string()),
            ("max_results", count.to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ]);
        let what = "arxiv query";
        let response = http::send(request, timeout, what).await?;
        let body = http::read_text(what, response).await?;
        parse_feed(&body)
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Academic
    }

    #[instrument(skip_all, fields(adapter = "arxiv", max_results = max_results))]
    async fn fetch(
        &self,
        query: &SourceQuery,
        max_results: usize,
        timeout: Duration,
    ) -> std::result::Result<SourceBatch, SourceError> {
        let SourceQuery::Academic {
            categories,
            keywords,
            phrase,
        } = query
        else {
            return Err(mismatched_query(SourceKind::Academic, query));
        };

        let categories = if categories.is_empty() {
            &self.default_categories
        } else {
            categories
        };
        let search_query = build_search_query(categories, keywords, phrase.as_deref())
            .ok_or_else(|| {
                SourceError::InvalidQuery("no categories, keywords or phrase to search".into())
            })?;

        let budget = http::Budget::start(timeout);
        let mut items: Vec<ContentItem> = Vec::new();
        let mut start = 0;
        while items.len() < max_results {
            if start > 0 && !budget.pause(self.page_delay).await {
                warn!(start, "no time left for the next arXiv page");
                return Ok(SourceBatch::partial(
                    items,
                    format!("time budget exhausted before page at offset {start}"),
                ));
            }

            let count = self.page_size.min(max_results - items.len());
            let page = match self
                .fetch_page(&search_query, start, count, budget.remaining())
                .await
            {
                Ok(page) => page,
                Err(e) if items.is_empty() => return Err(e),
                Err(e) if budget.is_exhausted() => {
                    warn!(start, error = %e, "arXiv page ran out of time");
                    return Ok(SourceBatch::partial(
                        items,
                        format!("time budget exhausted during page at offset {start}"),
                    ));
                }
                Err(e) => {
                    warn!(start, error = %e, "arXiv page failed after earlier pages succeeded");
                    return Ok(SourceBatch::partial(
                        items,
                        format!("page at offset {start} failed: {e}"),
                    ));
                }
            };

            let received = page.len();
            items.extend(page.into_iter().take(max_results - items.len()));
            if received < count {
                break;
            }
            start += received;
        }

        info!(items = items.len(), "arXiv fetch complete");
        Ok(SourceBatch::complete(items))
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}

// ---------------------------------------------------------------------------
// Query building
// ---------------------------------------------------------------------------

/// Build an arXiv `search_query`, e.g.
/// `(cat:q-bio.NC OR cat:cs.AI) AND (all:"gut brain" OR (all:gut AND all:brain))`.
///
/// Returns `None` when there is nothing to search for.
pub(crate) fn build_search_query(
    categories: &[String],
    keywords: &[String],
    phrase: Option<&str>,
) -> Option<String> {
    let cat_clause = match categories {
        [] => None,
        [single] => Some(format!("cat:{single}")),
        many => Some(format!(
            "({})",
            many.iter()
                .map(|c| format!("cat:{c}"))
                .collect::<Vec<_>>()
                .join(" OR ")
        )),
    };

    let keyword_clause = match keywords {
        [] => None,
        [single] => Some(format!("all:{single}")),
        many => Some(format!(
            "({})",
            many.iter()
                .map(|k| format!("all:{k}"))
                .collect::<Vec<_>>()
                .join(" AND ")
        )),
    };

    let phrase_clause = phrase
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("all:\"{}\"", p.replace('"', "")));

    let text_clause = match (phrase_clause, keyword_clause) {
        (Some(p), Some(k)) => Some(format!("({p} OR {k})")),
        (p, k) => p.or(k),
    };

    match (cat_clause, text_clause) {
        (Some(c), Some(t)) => Some(format!("{c} AND {t}")),
        (c, t) => c.or(t),
    }
}

// ---------------------------------------------------------------------------
// Feed parsing
// ---------------------------------------------------------------------------

fn parse_feed(xml: &str) -> std::result::Result<Vec<ContentItem>, SourceError> {
    let feed: Feed = quick_xml::de::from_str(xml)
        .map_err(|e| SourceError::Parse(format!("arXiv Atom feed: {e}")))?;

    if let Some(error) = feed.entries.iter().find(|e| e.id.contains(ERROR_ENTRY_MARKER)) {
        return Err(SourceError::InvalidQuery(format!(
            "arXiv rejected the query: {}",
            collapse_whitespace(&error.summary)
        )));
    }

    Ok(feed.entries.into_iter().map(entry_to_item).collect())
}

fn entry_to_item(entry: Entry) -> ContentItem {
    let id = entry.id.trim().to_string();
    let arxiv_id = id.rsplit("/abs/").next().unwrap_or(&id).to_string();
    let authors: Vec<String> = entry
        .authors
        .iter()
        .map(|a| collapse_whitespace(&a.name))
        .collect();
    let categories: Vec<String> = entry.categories.iter().map(|c| c.term.clone()).collect();
    let pdf_url = entry
        .links
        .iter()
        .find(|l| l.title.as_deref() == Some("pdf"))
        .map(|l| l.href.clone());

    let mut item = ContentItem::new(
        SourceKind::Academic,
        collapse_whitespace(&entry.title),
        collapse_whitespace(&entry.summary),
        id,
    )
    .with_published_at(entry.published.as_deref().and_then(parse_rfc3339))
    .with_metadata("arxiv_id", arxiv_id.into())
    .with_metadata("authors", authors.into())
    .with_metadata("categories", categories.into());

    if let Some(pdf_url) = pdf_url {
        item = item.with_metadata("pdf_url", pdf_url.into());
    }
    if let Some(updated) = entry.updated {
        item = item.with_metadata("updated", updated.trim().into());
    }
    item
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_shared::SourceErrorKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_fixture() -> String {
        std::fs::read_to_string("../../../fixtures/xml/arxiv_feed.xml").expect("read arXiv fixture")
    }

    fn adapter_for(server: &MockServer, page_size: usize) -> ArxivAdapter {
        let config = AcademicConfig {
            base_url: format!("{}/api/query", server.uri()),
            page_size,
            page_delay_ms: 0,
            default_categories: Vec::new(),
        };
        ArxivAdapter::new(&config, "harvester-test").unwrap()
    }

    fn academic_query() -> SourceQuery {
        SourceQuery::Academic {
            categories: vec!["q-bio.NC".into()],
            keywords: vec!["gut".into(), "brain".into()],
            phrase: Some("gut brain".into()),
        }
    }

    #[test]
    fn search_query_shapes() {
        let cats = vec!["q-bio.NC".to_string(), "cs.AI".to_string()];
        let kws = vec!["gut".to_string(), "brain".to_string()];
        assert_eq!(
            build_search_query(&cats, &kws, Some("gut brain")).unwrap(),
            r#"(cat:q-bio.NC OR cat:cs.AI) AND (all:"gut brain" OR (all:gut AND all:brain))"#
        );
        assert_eq!(
            build_search_query(&cats[..1], &[], None).unwrap(),
            "cat:q-bio.NC"
        );
        assert_eq!(
            build_search_query(&[], &kws[..1], None).unwrap(),
            "all:gut"
        );
        assert!(build_search_query(&[], &[], Some("  ")).is_none());
    }

    #[test]
    fn parses_feed_fixture() {
        let items = parse_feed(&feed_fixture()).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.source, SourceKind::Academic);
        assert_eq!(
            first.title,
            "Microbial Metabolites Modulate Gut-Brain Signalling"
        );
        assert!(first.body.starts_with("Short-chain fatty acids"));
        assert_eq!(first.url_or_identifier, "http://arxiv.org/abs/2403.01234v1");
        assert_eq!(first.raw_metadata["arxiv_id"], "2403.01234v1");
        assert_eq!(
            first.raw_metadata["authors"],
            serde_json::json!(["Ada Lovelace", "Alan Turing"])
        );
        assert_eq!(
            first.raw_metadata["categories"],
            serde_json::json!(["q-bio.NC", "q-bio.PE"])
        );
        assert_eq!(
            first.raw_metadata["pdf_url"],
            "http://arxiv.org/pdf/2403.01234v1"
        );
        assert_eq!(
            first.published_at.map(|d| d.to_rfc3339()),
            Some("2024-03-02T18:00:00+00:00".to_string())
        );
    }

    #[test]
    fn error_entry_is_invalid_query() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        let err = parse_feed(xml).unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::InvalidQuery);
        assert!(err.message().contains("incorrect id format"));
    }

    #[test]
    fn empty_feed_has_no_items() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = parse_feed("this is not xml <<").unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::Parse);
    }

    #[tokio::test]
    async fn fetch_sends_query_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "0"))
            .and(query_param("max_results", "1"))
            .and(query_param("search_query", "cat:q-bio.NC AND (all:\"gut brain\" OR (all:gut AND all:brain))"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_fixture()))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, 50);
        let batch = adapter
            .fetch(&academic_query(), 1, Duration::from_secs(5))
            .await
            .unwrap();
        // The mock ignores max_results and returns two entries
        assert_eq!(batch.items.len(), 1);
        assert!(batch.partial.is_none());
    }

    #[tokio::test]
    async fn later_page_failure_is_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_fixture()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, 2);
        let batch = adapter
            .fetch(&academic_query(), 4, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.items.len(), 2);
        assert!(batch.partial.expect("partial").contains("offset 2"));
    }

    #[tokio::test]
    async fn delayed_second_page_returns_first_page_as_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_fixture()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(feed_fixture())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, 2);
        let timeout = Duration::from_secs(1);
        let batch = tokio::time::timeout(timeout, adapter.fetch(&academic_query(), 4, timeout))
            .await
            .expect("fetch returned within its timeout")
            .unwrap();
        assert_eq!(batch.items.len(), 2);
        let reason = batch.partial.expect("partial");
        assert!(reason.starts_with("time budget exhausted"));
        assert!(reason.contains("offset 2"));
    }

    #[tokio::test]
    async fn page_delay_longer_than_budget_stops_paging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_fixture()))
            .expect(1)
            .mount(&server)
            .await;

        let config = AcademicConfig {
            base_url: format!("{}/api/query", server.uri()),
            page_size: 2,
            page_delay_ms: 3_000,
            default_categories: Vec::new(),
        };
        let adapter = ArxivAdapter::new(&config, "harvester-test").unwrap();
        let timeout = Duration::from_secs(1);
        let started = std::time::Instant::now();
        let batch = tokio::time::timeout(timeout, adapter.fetch(&academic_query(), 4, timeout))
            .await
            .expect("fetch returned within its timeout")
            .unwrap();

        assert!(started.elapsed() < timeout);
        assert_eq!(batch.items.len(), 2);
        assert_eq!(
            batch.partial.as_deref(),
            Some("time budget exhausted before page at offset 2")
        );
    }

    #[tokio::test]
    async fn first_page_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, 10);
        let err = adapter
            .fetch(&academic_query(), 5, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn empty_query_is_rejected_without_request() {
        let server = MockServer::start().await;
        let adapter = adapter_for(&server, 10);
        let query = SourceQuery::Academic {
            categories: vec![],
            keywords: vec![],
            phrase: None,
        };
        let err = adapter
            .fetch(&query, 5, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::InvalidQuery);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
