//! PubMed adapter over NCBI E-utilities.
//!
//! Two steps: `esearch` (JSON) resolves the query to PMIDs, then `efetch`
//! (XML) retrieves the records in batches. Every request carries the
//! identifying `tool`/`email` parameters and the API key when configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use harvester_shared::text::collapse_whitespace;
use harvester_shared::{
    BiomedicalConfig, ContentItem, MAX_PUBMED_BATCH, Result, SourceBatch, SourceError, SourceKind,
    SourceQuery, resolve_api_key,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{SourceAdapter, mismatched_query};
use crate::http;

/// Adapter for the PubMed biomedical literature index.
pub struct PubmedAdapter {
    client: Client,
    base_url: String,
    tool: String,
    email: Option<String>,
    api_key: Option<String>,
    batch_size: usize,
    request_delay: Duration,
}

impl PubmedAdapter {
    pub fn new(config: &BiomedicalConfig, user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: http::build_client(user_agent)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tool: config.tool.clone(),
            email: config.email.clone(),
            api_key: resolve_api_key(config),
            batch_size: config.batch_size.clamp(1, MAX_PUBMED_BATCH),
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }

    /// Parameters sent with every E-utilities request.
    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", self.tool.clone())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn search(
        &self,
        term: &str,
        max_results: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<String>, SourceError> {
        let mut params = self.common_params();
        params.extend([
            ("term", term.to_string()),
            ("retmax", max_results.to_string()),
            ("retmode", "json".to_string()),
            ("sort", "relevance".to_string()),
        ]);

        let url = format!("{}/esearch.fcgi", self.base_url);
        let what = "pubmed esearch";
        let response = http::send(self.client.get(&url).query(&params), timeout, what).await?;
        let body = http::read_text(what, response).await?;
        parse_esearch(&body)
    }

    async fn fetch_records(
        &self,
        pmids: &[String],
        timeout: Duration,
    ) -> std::result::Result<Vec<ContentItem>, SourceError> {
        let mut params = self.common_params();
        params.extend([
            ("id", pmids.join(",")),
            ("retmode", "xml".to_string()),
        ]);

        let url = format!("{}/efetch.fcgi", self.base_url);
        let what = "pubmed efetch";
        let response = http::send(self.client.get(&url).query(&params), timeout, what).await?;
        let body = http::read_text(what, response).await?;
        parse_efetch(&body)
    }
}

#[async_trait]
impl SourceAdapter for PubmedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Biomedical
    }

    #[instrument(skip_all, fields(adapter = "pubmed", max_results = max_results))]
    async fn fetch(
        &self,
        query: &SourceQuery,
        max_results: usize,
        timeout: Duration,
    ) -> std::result::Result<SourceBatch, SourceError> {
        let SourceQuery::Biomedical {
            keywords,
            phrase,
            mesh_terms,
        } = query
        else {
            return Err(mismatched_query(SourceKind::Biomedical, query));
        };

        let term = build_term(keywords, phrase.as_deref(), mesh_terms).ok_or_else(|| {
            SourceError::InvalidQuery("no keywords, phrase or MeSH terms to search".into())
        })?;
        debug!(%term, "searching PubMed");

        let budget = http::Budget::start(timeout);
        let pmids = self.search(&term, max_results, budget.remaining()).await?;
        if pmids.is_empty() {
            info!("PubMed search returned no records");
            return Ok(SourceBatch::complete(Vec::new()));
        }

        let batches = pmids.len().div_ceil(self.batch_size);
        let mut items: Vec<ContentItem> = Vec::with_capacity(pmids.len().min(max_results));
        for (index, batch) in pmids.chunks(self.batch_size).enumerate() {
            if !budget.pause(self.request_delay).await {
                if items.is_empty() {
                    return Err(SourceError::Timeout(format!(
                        "no time left to fetch records within {}ms",
                        timeout.as_millis()
                    )));
                }
                warn!(batch = index, "no time left for the next efetch batch");
                items.truncate(max_results);
                return Ok(SourceBatch::partial(
                    items,
                    format!("time budget exhausted before efetch batch {} of {batches}", index + 1),
                ));
            }

            match self.fetch_records(batch, budget.remaining()).await {
                Ok(records) => items.extend(records),
                Err(e) if items.is_empty() => return Err(e),
                Err(e) => {
                    warn!(batch = index, error = %e, "efetch batch failed after earlier batches succeeded");
                    let reason = if budget.is_exhausted() {
                        format!("time budget exhausted during efetch batch {} of {batches}", index + 1)
                    } else {
                        format!("efetch batch {} of {batches} failed: {e}", index + 1)
                    };
                    items.truncate(max_results);
                    return Ok(SourceBatch::partial(items, reason));
                }
            }
        }

        items.truncate(max_results);
        info!(items = items.len(), "PubMed fetch complete");
        Ok(SourceBatch::complete(items))
    }

    fn name(&self) -> &str {
        "pubmed"
    }
}

// ---------------------------------------------------------------------------
// Query building
// ---------------------------------------------------------------------------

/// Build an Entrez search term, e.g.
/// `("gut brain"[Title/Abstract] OR (gut[Title/Abstract] AND brain[Title/Abstract])) AND "Brain-Gut Axis"[MeSH Terms]`.
///
/// Returns `None` when there is nothing to search for.
pub(crate) fn build_term(
    keywords: &[String],
    phrase: Option<&str>,
    mesh_terms: &[String],
) -> Option<String> {
    let keyword_clause = match keywords {
        [] => None,
        [single] => Some(format!("{single}[Title/Abstract]")),
        many => Some(format!(
            "({})",
            many.iter()
                .map(|k| format!("{k}[Title/Abstract]"))
                .collect::<Vec<_>>()
                .join(" AND ")
        )),
    };

    let phrase_clause = phrase
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("\"{}\"[Title/Abstract]", p.replace('"', "")));

    let text_clause = match (phrase_clause, keyword_clause) {
        (Some(p), Some(k)) => Some(format!("({p} OR {k})")),
        (p, k) => p.or(k),
    };

    let mut clauses: Vec<String> = text_clause.into_iter().collect();
    clauses.extend(
        mesh_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{}\"[MeSH Terms]", t.replace('"', ""))),
    );

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

// ---------------------------------------------------------------------------
// esearch parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

fn parse_esearch(body: &str) -> std::result::Result<Vec<String>, SourceError> {
    let response: EsearchResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Parse(format!("esearch response: {e}")))?;

    if let Some(error) = response.esearchresult.error {
        return Err(SourceError::InvalidQuery(format!(
            "PubMed rejected the query: {error}"
        )));
    }
    Ok(response.esearchresult.idlist)
}

// ---------------------------------------------------------------------------
// efetch parsing
// ---------------------------------------------------------------------------

/// Fields collected while walking one `<PubmedArticle>`.
#[derive(Debug, Default)]
struct ArticleRecord {
    pmid: String,
    title: String,
    abstract_sections: Vec<(Option<String>, String)>,
    journal: String,
    year: String,
    month: String,
    day: String,
    medline_date: String,
    authors: Vec<String>,
    mesh_terms: Vec<String>,
    doi: Option<String>,
}

#[derive(Debug, Default)]
struct AuthorName {
    last: String,
    fore: String,
    initials: String,
    collective: String,
}

impl AuthorName {
    fn display(&self) -> Option<String> {
        let collective = collapse_whitespace(&self.collective);
        if !collective.is_empty() {
            return Some(collective);
        }
        let last = collapse_whitespace(&self.last);
        if last.is_empty() {
            return None;
        }
        let initials = collapse_whitespace(&self.initials);
        let given = if initials.is_empty() {
            collapse_whitespace(&self.fore)
        } else {
            initials
        };
        Some(if given.is_empty() {
            last
        } else {
            format!("{last} {given}")
        })
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn ends_with(stack: &[String], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn within(stack: &[String], name: &str) -> bool {
    stack.iter().any(|s| s == name)
}

/// Parse an efetch `PubmedArticleSet` into content items.
fn parse_efetch(xml: &str) -> std::result::Result<Vec<ContentItem>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<String> = Vec::new();
    let mut items = Vec::new();
    let mut record: Option<ArticleRecord> = None;
    let mut author = AuthorName::default();
    let mut article_id_type: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            SourceError::Parse(format!(
                "efetch XML at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "PubmedArticle" => record = Some(ArticleRecord::default()),
                    "Author" => author = AuthorName::default(),
                    "AbstractText" => {
                        if let Some(rec) = record.as_mut() {
                            rec.abstract_sections
                                .push((attribute(&e, "Label"), String::new()));
                        }
                    }
                    "ArticleId" => article_id_type = attribute(&e, "IdType"),
                    _ => {}
                }
                stack.push(name);
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                match name.as_str() {
                    "Author" => {
                        if let (Some(rec), Some(display)) = (record.as_mut(), author.display()) {
                            rec.authors.push(display);
                        }
                    }
                    "PubmedArticle" => {
                        if let Some(item) = record.take().and_then(record_to_item) {
                            items.push(item);
                        }
                    }
                    "ArticleId" => article_id_type = None,
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                collect_text(&stack, &mut record, &mut author, article_id_type.as_deref(), &text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                collect_text(&stack, &mut record, &mut author, article_id_type.as_deref(), &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

/// Route a text node to the record field its element path names.
fn collect_text(
    stack: &[String],
    record: &mut Option<ArticleRecord>,
    author: &mut AuthorName,
    article_id_type: Option<&str>,
    text: &str,
) {
    let Some(rec) = record.as_mut() else {
        return;
    };

    if ends_with(stack, &["MedlineCitation", "PMID"]) {
        rec.pmid.push_str(text.trim());
    } else if within(stack, "ArticleTitle") {
        rec.title.push_str(text);
    } else if within(stack, "AbstractText") {
        if let Some((_, section)) = rec.abstract_sections.last_mut() {
            section.push_str(text);
        }
    } else if ends_with(stack, &["Journal", "Title"]) {
        rec.journal.push_str(text);
    } else if within(stack, "JournalIssue") && within(stack, "PubDate") {
        match stack.last().map(String::as_str) {
            Some("Year") => rec.year.push_str(text.trim()),
            Some("Month") => rec.month.push_str(text.trim()),
            Some("Day") => rec.day.push_str(text.trim()),
            Some("MedlineDate") => rec.medline_date.push_str(text),
            _ => {}
        }
    } else if ends_with(stack, &["AuthorList", "Author", "LastName"]) {
        author.last.push_str(text);
    } else if ends_with(stack, &["AuthorList", "Author", "ForeName"]) {
        author.fore.push_str(text);
    } else if ends_with(stack, &["AuthorList", "Author", "Initials"]) {
        author.initials.push_str(text);
    } else if ends_with(stack, &["AuthorList", "Author", "CollectiveName"]) {
        author.collective.push_str(text);
    } else if ends_with(stack, &["MeshHeading", "DescriptorName"]) {
        let term = collapse_whitespace(text);
        if !term.is_empty() {
            rec.mesh_terms.push(term);
        }
    } else if ends_with(stack, &["PubmedData", "ArticleIdList", "ArticleId"])
        && article_id_type == Some("doi")
    {
        let doi = text.trim();
        if !doi.is_empty() {
            rec.doi = Some(doi.to_string());
        }
    }
}

fn record_to_item(rec: ArticleRecord) -> Option<ContentItem> {
    if rec.pmid.is_empty() {
        return None;
    }

    let body = rec
        .abstract_sections
        .iter()
        .map(|(label, text)| {
            let text = collapse_whitespace(text);
            match label {
                Some(label) if !label.is_empty() => format!("{label}: {text}"),
                _ => text,
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let published_at = publication_date(&rec);
    let url = format!("https://pubmed.ncbi.nlm.nih.gov/{}/", rec.pmid);

    let mut item = ContentItem::new(
        SourceKind::Biomedical,
        collapse_whitespace(&rec.title),
        body,
        url,
    )
    .with_published_at(published_at)
    .with_metadata("pmid", rec.pmid.clone().into())
    .with_metadata("authors", rec.authors.into())
    .with_metadata("mesh_terms", rec.mesh_terms.into());

    let journal = collapse_whitespace(&rec.journal);
    if !journal.is_empty() {
        item = item.with_metadata("journal", journal.into());
    }
    if let Some(doi) = rec.doi {
        item = item.with_metadata("doi", doi.into());
    }
    Some(item)
}

/// Journal issue date: `Year`/`Month`/`Day` or the free-form `MedlineDate`
/// (e.g. `2019 Nov-Dec`), whose leading year is used.
fn publication_date(rec: &ArticleRecord) -> Option<chrono::DateTime<Utc>> {
    let year: i32 = if rec.year.is_empty() {
        rec.medline_date
            .split_whitespace()
            .next()
            .and_then(|y| y.get(..4))
            .and_then(|y| y.parse().ok())?
    } else {
        rec.year.parse().ok()?
    };
    let month = parse_month(&rec.month).unwrap_or(1);
    let day = rec.day.parse().unwrap_or(1);

    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_month(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = s.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .and_then(|i| u32::try_from(i + 1).ok())
}
