//! Quality filtering with an injected scorer.
//!
//! The scorer is an external capability returning a value in [0, 1] for an
//! item. Items are scored concurrently under a bound. Scores are clamped;
//! an item whose score is NaN or whose scoring fails is excluded, so a
//! broken scorer drops items instead of aborting the run.

use std::sync::Arc;

use async_trait::async_trait;
use harvester_shared::ContentItem;
use harvester_shared::text::{keywords, token_set};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::plan::topic_url;

/// Failure reported by a [`QualityScorer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scoring failed: {0}")]
pub struct ScoreError(pub String);

/// Scores an item's quality/relevance in [0, 1].
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, item: &ContentItem) -> Result<f64, ScoreError>;

    /// Human-readable scorer name for tracing.
    fn name(&self) -> &str {
        "custom"
    }
}

// ---------------------------------------------------------------------------
// Bundled scorers
// ---------------------------------------------------------------------------

/// Wraps a synchronous closure as a [`QualityScorer`].
pub struct FnScorer<F> {
    f: F,
}

impl<F> FnScorer<F>
where
    F: Fn(&ContentItem) -> Result<f64, ScoreError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> QualityScorer for FnScorer<F>
where
    F: Fn(&ContentItem) -> Result<f64, ScoreError> + Send + Sync,
{
    async fn score(&self, item: &ContentItem) -> Result<f64, ScoreError> {
        (self.f)(item)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Bodies shorter than this are penalized.
const SHORT_BODY_WORDS: usize = 20;
const COVERAGE_WEIGHT: f64 = 0.7;
const TITLE_WEIGHT: f64 = 0.3;
const SHORT_BODY_PENALTY: f64 = 0.5;

/// Topic-keyword coverage scorer, used when no scorer is injected.
///
/// `0.7 * (keywords found anywhere) + 0.3 * (keywords found in the title)`,
/// halved for bodies under 20 words. With no keywords every item scores 1.0
/// before the short-body penalty.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer {
    keywords: Vec<String>,
}

impl KeywordScorer {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    /// Scorer for the keywords of `topic`; a URL topic has none.
    pub fn for_topic(topic: &str) -> Self {
        if topic_url(topic).is_some() {
            Self::default()
        } else {
            Self::new(keywords(topic))
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn compute(&self, item: &ContentItem) -> f64 {
        let penalty = if item.body.split_whitespace().count() < SHORT_BODY_WORDS {
            SHORT_BODY_PENALTY
        } else {
            1.0
        };
        if self.keywords.is_empty() {
            return penalty;
        }

        let title_tokens = token_set(&item.title);
        let body_tokens = token_set(&item.body);
        let total = self.keywords.len() as f64;
        let in_title = self
            .keywords
            .iter()
            .filter(|k| title_tokens.contains(k.as_str()))
            .count() as f64;
        let anywhere = self
            .keywords
            .iter()
            .filter(|k| title_tokens.contains(k.as_str()) || body_tokens.contains(k.as_str()))
            .count() as f64;

        (COVERAGE_WEIGHT * anywhere / total + TITLE_WEIGHT * in_title / total) * penalty
    }
}

#[async_trait]
impl QualityScorer for KeywordScorer {
    async fn score(&self, item: &ContentItem) -> Result<f64, ScoreError> {
        Ok(self.compute(item))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Score every item, at most `concurrency` at a time, and keep those scoring
/// at least `threshold`, each carrying its score. Input order is preserved.
pub async fn filter(
    items: Vec<ContentItem>,
    threshold: f64,
    scorer: Arc<dyn QualityScorer>,
    concurrency: usize,
) -> Vec<ContentItem> {
    let before = items.len();
    let limiter = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let scorer = Arc::clone(&scorer);
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return (index, item, None);
            };
            let score = checked_score(scorer.as_ref(), &item).await;
            (index, item, score)
        });
    }

    let mut scored = Vec::with_capacity(before);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => scored.push(entry),
            Err(e) => warn!(error = %e, "scoring task ended abnormally, item excluded"),
        }
    }
    scored.sort_unstable_by_key(|(index, ..)| *index);

    let kept: Vec<ContentItem> = scored
        .into_iter()
        .filter_map(|(_, item, score)| {
            score
                .filter(|s| *s >= threshold)
                .map(|s| item.with_quality_score(s))
        })
        .collect();

    debug!(
        before,
        after = kept.len(),
        threshold,
        concurrency,
        scorer = scorer.name(),
        "quality filter applied"
    );
    kept
}

/// Clamped score, or `None` when the item must be excluded.
async fn checked_score(scorer: &dyn QualityScorer, item: &ContentItem) -> Option<f64> {
    match scorer.score(item).await {
        Ok(s) if s.is_nan() => {
            warn!(scorer = scorer.name(), url = %item.url_or_identifier, "scorer returned NaN, excluding item");
            None
        }
        Ok(s) => Some(s.clamp(0.0, 1.0)),
        Err(e) => {
            warn!(scorer = scorer.name(), url = %item.url_or_identifier, error = %e, "scorer failed, excluding item");
            None
        }
    }
}
