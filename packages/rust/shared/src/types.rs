//! Core domain types: content items, ingestion plans and results.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{HarvesterError, SourceError, SourceErrorKind};
use crate::text::normalize_text;

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// The closed set of source types a plan can fetch from.
///
/// Declaration order is the default merge priority: web before academic
/// before biomedical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Rendered web pages.
    Web,
    /// Academic paper index (arXiv).
    #[serde(alias = "arxiv")]
    Academic,
    /// Biomedical literature index (PubMed).
    #[serde(alias = "pubmed")]
    Biomedical,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Academic => "academic",
            Self::Biomedical => "biomedical",
        }
    }

    /// All kinds in default priority order.
    pub fn all() -> &'static [SourceKind] {
        &[Self::Web, Self::Academic, Self::Biomedical]
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = HarvesterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "academic" | "arxiv" => Ok(Self::Academic),
            "biomedical" | "pubmed" => Ok(Self::Biomedical),
            other => Err(HarvesterError::validation(format!(
                "unknown source kind '{other}': expected web, academic or biomedical"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentItem
// ---------------------------------------------------------------------------

/// A single piece of fetched content, normalized across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Which source produced the item.
    pub source: SourceKind,
    /// Display title.
    pub title: String,
    /// Extracted text (page Markdown, abstract, ...).
    pub body: String,
    /// URL or stable identifier (arXiv abs URL, PubMed URL).
    pub url_or_identifier: String,
    /// Publication time, when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Source-specific metadata (authors, categories, journal, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_metadata: BTreeMap<String, serde_json::Value>,
    /// Quality score in [0, 1]; unset until the quality filter runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl ContentItem {
    pub fn new(
        source: SourceKind,
        title: impl Into<String>,
        body: impl Into<String>,
        url_or_identifier: impl Into<String>,
    ) -> Self {
        Self {
            source,
            title: title.into(),
            body: body.into(),
            url_or_identifier: url_or_identifier.into(),
            published_at: None,
            raw_metadata: BTreeMap::new(),
            quality_score: None,
        }
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.raw_metadata.insert(key.into(), value);
        self
    }

    /// Return a copy of this item carrying `score`.
    pub fn with_quality_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    /// Title and body, lowercased with punctuation and whitespace collapsed.
    pub fn normalized_text(&self) -> String {
        normalize_text(&format!("{} {}", self.title, self.body))
    }

    /// SHA-256 hex digest of [`Self::normalized_text`], the item's
    /// deduplication identity.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_text().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for plan identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    /// Generate a new time-sortable plan identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Source-specific query. The variant determines the [`SourceKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceQuery {
    /// Pages to fetch directly.
    Web {
        urls: Vec<String>,
        /// How long a rendering service may wait for dynamic content.
        #[serde(rename = "render_delay_ms", with = "duration_ms")]
        render_delay: Duration,
    },
    /// arXiv search by category and keywords.
    Academic {
        #[serde(default)]
        categories: Vec<String>,
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phrase: Option<String>,
    },
    /// PubMed search by keywords, optionally restricted to MeSH terms.
    Biomedical {
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phrase: Option<String>,
        #[serde(default)]
        mesh_terms: Vec<String>,
    },
}

impl SourceQuery {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Web { .. } => SourceKind::Web,
            Self::Academic { .. } => SourceKind::Academic,
            Self::Biomedical { .. } => SourceKind::Biomedical,
        }
    }
}

/// One source to fetch within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionSource {
    pub query: SourceQuery,
    /// Hard upper bound on returned items.
    pub max_results: usize,
    /// Time budget for a single fetch attempt.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl IngestionSource {
    pub fn kind(&self) -> SourceKind {
        self.query.kind()
    }
}

/// Immutable description of what to fetch, from where, under what limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionPlan {
    pub id: PlanId,
    pub topic: String,
    /// Sources in merge priority order.
    pub sources: Vec<IngestionSource>,
    pub max_concurrency: usize,
    pub quality_threshold: f64,
    /// Optional wall-clock budget for the whole plan.
    #[serde(
        rename = "deadline_ms",
        default,
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

/// What an adapter returns on success.
///
/// `partial` is set when the adapter knowingly returns an incomplete set
/// (e.g. one of several pages failed). Truncation to `max_results` is not
/// partial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub items: Vec<ContentItem>,
    pub partial: Option<String>,
}

impl SourceBatch {
    pub fn complete(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            partial: None,
        }
    }

    pub fn partial(items: Vec<ContentItem>, reason: impl Into<String>) -> Self {
        Self {
            items,
            partial: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Orchestrator lifecycle. Only the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Planned,
    Executing,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed
        )
    }
}

/// How a single source ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    Success,
    Partial,
    Failed,
}

/// Why a source failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl From<&SourceError> for SourceFailure {
    fn from(err: &SourceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// Per-source status recorded in an [`IngestionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub outcome: SourceOutcome,
    /// Items returned by the adapter, before dedup and filtering.
    pub item_count: usize,
    /// Adapter calls made, including the successful one.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SourceFailure>,
    /// Reason for a partial outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SourceStatus {
    pub fn succeeded(item_count: usize, attempts: u32, partial: Option<String>) -> Self {
        Self {
            outcome: if partial.is_some() {
                SourceOutcome::Partial
            } else {
                SourceOutcome::Success
            },
            item_count,
            attempts,
            error: None,
            note: partial,
        }
    }

    pub fn failed(error: &SourceError, attempts: u32) -> Self {
        Self {
            outcome: SourceOutcome::Failed,
            item_count: 0,
            attempts,
            error: Some(SourceFailure::from(error)),
            note: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == SourceOutcome::Failed
    }
}

/// Unified outcome of executing one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub plan_id: PlanId,
    pub topic: String,
    /// Terminal state reached.
    pub state: ExecutionState,
    /// Deduplicated, quality-filtered items in source priority order.
    pub items: Vec<ContentItem>,
    pub per_source_status: BTreeMap<SourceKind, SourceStatus>,
    #[serde(rename = "total_duration_ms", with = "duration_ms")]
    pub total_duration: Duration,
    /// True iff at least one source succeeded.
    pub success: bool,
}

impl IngestionResult {
    pub fn status(&self, kind: SourceKind) -> Option<&SourceStatus> {
        self.per_source_status.get(&kind)
    }

    /// Failed sources with their recorded failure.
    pub fn failures(&self) -> impl Iterator<Item = (SourceKind, &SourceStatus)> {
        self.per_source_status
            .iter()
            .filter(|(_, s)| s.is_failed())
            .map(|(k, s)| (*k, s))
    }
}

// ---------------------------------------------------------------------------
// Duration serde helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Serialize an optional [`Duration`] as integer milliseconds.
pub mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
