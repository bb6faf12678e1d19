//! Plan building: topic + context → immutable [`IngestionPlan`].
//!
//! No network access happens here. Every rejection is an
//! [`HarvesterError::InvalidPlan`] raised before execution starts.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use harvester_shared::text::keywords;
use harvester_shared::{
    AppConfig, HarvesterError, IngestionPlan, IngestionSource, PlanId, Result, SourceKind,
    SourceQuery,
};

/// Caller-supplied knobs for one plan. Unset fields fall back to
/// [`PlanDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanContext {
    /// Source kinds in priority order. Empty means all kinds.
    pub sources: Vec<SourceKind>,
    /// Per-source item caps.
    pub limits: BTreeMap<SourceKind, usize>,
    pub quality_threshold: Option<f64>,
    pub max_concurrency: Option<usize>,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Whole-plan budget in seconds.
    pub deadline_secs: Option<u64>,
    /// Direct links for the web source.
    pub urls: Vec<String>,
    /// arXiv categories, e.g. `q-bio.NC`.
    pub categories: Vec<String>,
    /// PubMed MeSH terms.
    pub mesh_terms: Vec<String>,
    pub render_delay_ms: Option<u64>,
}

/// Values used when a [`PlanContext`] leaves a field unset.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefaults {
    pub max_concurrency: usize,
    pub quality_threshold: f64,
    pub max_results: usize,
    pub timeout: Duration,
    pub deadline: Option<Duration>,
    pub render_delay: Duration,
    pub categories: Vec<String>,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PlanDefaults {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.defaults.max_concurrency,
            quality_threshold: config.defaults.quality_threshold,
            max_results: config.defaults.max_results,
            timeout: Duration::from_secs(config.defaults.source_timeout_secs),
            deadline: config.defaults.deadline_secs.map(Duration::from_secs),
            render_delay: Duration::from_millis(config.web.render_delay_ms),
            categories: config.academic.default_categories.clone(),
        }
    }
}

/// Returns the topic as a URL when it is a direct http(s) link.
pub fn topic_url(topic: &str) -> Option<Url> {
    let trimmed = topic.trim();
    if trimmed.contains(char::is_whitespace) {
        return None;
    }
    Url::parse(trimmed)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

fn parse_web_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| HarvesterError::invalid_plan(format!("invalid URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HarvesterError::invalid_plan(format!(
            "unsupported URL scheme '{}' in '{raw}'",
            url.scheme()
        )));
    }
    Ok(url.to_string())
}

/// Builds plans from a topic and a [`PlanContext`].
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    defaults: PlanDefaults,
}

impl PlanBuilder {
    pub fn new(defaults: PlanDefaults) -> Self {
        Self { defaults }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(PlanDefaults::from(config))
    }

    pub fn defaults(&self) -> &PlanDefaults {
        &self.defaults
    }

    /// Build an immutable plan for `topic`.
    #[instrument(skip_all, fields(topic = %topic))]
    pub fn build(&self, topic: &str, ctx: &PlanContext) -> Result<IngestionPlan> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(HarvesterError::invalid_plan("topic is empty"));
        }

        let quality_threshold = ctx
            .quality_threshold
            .unwrap_or(self.defaults.quality_threshold);
        if !(0.0..=1.0).contains(&quality_threshold) {
            return Err(HarvesterError::invalid_plan(format!(
                "quality threshold {quality_threshold} is outside [0, 1]"
            )));
        }

        let max_concurrency = ctx.max_concurrency.unwrap_or(self.defaults.max_concurrency);
        if max_concurrency == 0 {
            return Err(HarvesterError::invalid_plan(
                "max concurrency must be at least 1",
            ));
        }

        let timeout = ctx
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.defaults.timeout);
        if timeout.is_zero() {
            return Err(HarvesterError::invalid_plan("source timeout must be positive"));
        }

        let deadline = ctx
            .deadline_secs
            .map(Duration::from_secs)
            .or(self.defaults.deadline);
        if deadline.is_some_and(|d| d.is_zero()) {
            return Err(HarvesterError::invalid_plan("plan deadline must be positive"));
        }

        if let Some((kind, _)) = ctx.limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(HarvesterError::invalid_plan(format!(
                "limit for source '{kind}' must be at least 1"
            )));
        }

        let requested: Vec<SourceKind> = if ctx.sources.is_empty() {
            SourceKind::all().to_vec()
        } else {
            ctx.sources.clone()
        };
        let mut seen = HashSet::new();
        if let Some(dup) = requested.iter().find(|k| !seen.insert(**k)) {
            return Err(HarvesterError::invalid_plan(format!(
                "source '{dup}' requested more than once"
            )));
        }

        let url_topic = topic_url(topic);
        let keywords = if url_topic.is_some() {
            Vec::new()
        } else {
            keywords(topic)
        };
        let phrase = (keywords.len() > 1).then(|| keywords.join(" "));

        let mut sources = Vec::with_capacity(requested.len());
        for kind in requested {
            let query = match kind {
                SourceKind::Web => {
                    let urls = if !ctx.urls.is_empty() {
                        ctx.urls
                            .iter()
                            .map(|u| parse_web_url(u))
                            .collect::<Result<Vec<_>>>()?
                    } else if let Some(url) = &url_topic {
                        vec![url.to_string()]
                    } else {
                        warn!("no URL for the web source, skipping it");
                        continue;
                    };
                    SourceQuery::Web {
                        urls,
                        render_delay: ctx
                            .render_delay_ms
                            .map(Duration::from_millis)
                            .unwrap_or(self.defaults.render_delay),
                    }
                }
                SourceKind::Academic => {
                    let categories = if ctx.categories.is_empty() {
                        self.defaults.categories.clone()
                    } else {
                        ctx.categories.clone()
                    };
                    if keywords.is_empty() && categories.is_empty() {
                        warn!("no keywords or categories for the academic source, skipping it");
                        continue;
                    }
                    SourceQuery::Academic {
                        categories,
                        keywords: keywords.clone(),
                        phrase: phrase.clone(),
                    }
                }
                SourceKind::Biomedical => {
                    if keywords.is_empty() && ctx.mesh_terms.is_empty() {
                        warn!("no keywords or MeSH terms for the biomedical source, skipping it");
                        continue;
                    }
                    SourceQuery::Biomedical {
                        keywords: keywords.clone(),
                        phrase: phrase.clone(),
                        mesh_terms: ctx.mesh_terms.clone(),
                    }
                }
            };

            sources.push(IngestionSource {
                query,
                max_results: ctx
                    .limits
                    .get(&kind)
                    .copied()
                    .unwrap_or(self.defaults.max_results),
                timeout,
            });
        }

        if sources.is_empty() {
            return Err(HarvesterError::invalid_plan(format!(
                "no source could be resolved for topic '{topic}'"
            )));
        }

        let plan = IngestionPlan {
            id: PlanId::new(),
            topic: topic.to_string(),
            sources,
            max_concurrency,
            quality_threshold,
            deadline,
            created_at: Utc::now(),
        };
        debug!(
            plan_id = %plan.id,
            sources = plan.sources.len(),
            keywords = keywords.len(),
            "plan built"
        );
        Ok(plan)
    }
}

/// Build a plan with default settings.
pub fn build_plan(topic: &str, ctx: &PlanContext) -> Result<IngestionPlan> {
    PlanBuilder::default().build(topic, ctx)
}
