//! Web page adapter.
//!
//! Fetches each URL directly, or through a headless-rendering service when
//! one is configured so JavaScript-built content is materialized first.

use std::time::Duration;

use async_trait::async_trait;
use harvester_shared::{
    ContentItem, HarvesterError, Result, SourceBatch, SourceError, SourceKind, SourceQuery, WebConfig,
};
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{SourceAdapter, mismatched_query};
use crate::extract::extract_page;
use crate::http;

/// Adapter for plain and JavaScript-rendered web pages.
pub struct WebAdapter {
    client: Client,
    /// `POST {url, waitFor}` endpoint returning rendered HTML.
    render_endpoint: Option<Url>,
}

impl WebAdapter {
    pub fn new(config: &WebConfig) -> Result<Self> {
        let render_endpoint = match config.render_endpoint.as_deref() {
            Some(raw) => Some(Url::parse(raw).map_err(|e| {
                HarvesterError::config(format!(
                    "web.render_endpoint is not a valid URL ({raw}): {e}"
                ))
            })?),
            None => None,
        };

        Ok(Self {
            client: http::build_client(&config.user_agent)?,
            render_endpoint,
        })
    }

    async fn fetch_html(
        &self,
        url: &Url,
        render_delay: Duration,
        timeout: Duration,
    ) -> std::result::Result<String, SourceError> {
        let what = url.as_str();
        let request = match &self.render_endpoint {
            Some(endpoint) => {
                debug!(%url, %endpoint, "fetching page via renderer");
                let wait_ms = u64::try_from(render_delay.as_millis()).unwrap_or(u64::MAX);
                self.client
                    .post(endpoint.as_str())
                    .json(&serde_json::json!({ "url": url.as_str(), "waitFor": wait_ms }))
            }
            None => {
                debug!(%url, "fetching page");
                self.client.get(url.as_str())
            }
        };

        let response = http::send(request, timeout, what).await?;
        http::read_text(what, response).await
    }

    async fn fetch_page(
        &self,
        raw_url: &str,
        render_delay: Duration,
        timeout: Duration,
    ) -> std::result::Result<ContentItem, SourceError> {
        let url = Url::parse(raw_url)
            .map_err(|e| SourceError::InvalidQuery(format!("{raw_url}: invalid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidQuery(format!(
                "{raw_url}: unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let html = self.fetch_html(&url, render_delay, timeout).await?;
        let page = extract_page(&html).map_err(|e| SourceError::Parse(format!("{url}: {e}")))?;
        if page.body.is_empty() {
            return Err(SourceError::Parse(format!("{url}: no extractable content")));
        }

        let mut item = ContentItem::new(
            SourceKind::Web,
            page.title.unwrap_or_else(|| url.to_string()),
            page.body,
            url.as_str(),
        )
        .with_published_at(page.published_at)
        .with_metadata("word_count", page.word_count.into())
        .with_metadata(
            "rendered",
            serde_json::Value::Bool(self.render_endpoint.is_some()),
        );
        if let Some(description) = page.description {
            item = item.with_metadata("description", description.into());
        }
        if let Some(canonical) = page.canonical_url {
            item = item.with_metadata("canonical_url", canonical.into());
        }
        Ok(item)
    }
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    #[instrument(skip_all, fields(adapter = "web", max_results = max_results))]
    async fn fetch(
        &self,
        query: &SourceQuery,
        max_results: usize,
        timeout: Duration,
    ) -> std::result::Result<SourceBatch, SourceError> {
        let SourceQuery::Web { urls, render_delay } = query else {
            return Err(mismatched_query(SourceKind::Web, query));
        };
        if urls.is_empty() {
            return Err(SourceError::InvalidQuery("no URLs to fetch".into()));
        }

        let targets: Vec<&String> = urls.iter().take(max_results).collect();
        let budget = http::Budget::start(timeout);
        let mut items = Vec::with_capacity(targets.len());
        let mut errors: Vec<SourceError> = Vec::new();
        let mut attempted = 0;

        for raw_url in &targets {
            if budget.is_exhausted() {
                break;
            }
            attempted += 1;
            match self.fetch_page(raw_url, *render_delay, budget.remaining()).await {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(url = %raw_url, error = %e, "page fetch failed");
                    errors.push(e);
                }
            }
        }

        if items.is_empty() {
            // Every page failed; the first error speaks for the source
            return Err(errors.into_iter().next().unwrap_or_else(|| {
                SourceError::Timeout(format!("no page fetched within {}ms", timeout.as_millis()))
            }));
        }

        if budget.is_exhausted() && (attempted < targets.len() || !errors.is_empty()) {
            warn!(fetched = items.len(), "time budget exhausted");
            let reason = format!(
                "time budget exhausted after {} of {} pages",
                items.len(),
                targets.len()
            );
            return Ok(SourceBatch::partial(items, reason));
        }

        if let Some(first) = errors.first() {
            let reason = format!(
                "{} of {} pages failed (first: {first})",
                errors.len(),
                targets.len()
            );
            return Ok(SourceBatch::partial(items, reason));
        }

        Ok(SourceBatch::complete(items))
    }

    fn name(&self) -> &str {
        "web"
    }
}
