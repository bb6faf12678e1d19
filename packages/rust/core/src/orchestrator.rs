//! Plan execution: concurrent source fetches → merge → dedup → quality
//! filter → [`IngestionResult`].
//!
//! Lifecycle: `Planned → Executing → {Completed, PartiallyCompleted, Failed}`.
//! One Tokio task runs per plan source. Every adapter attempt holds a
//! permit of a semaphore sized to `plan.max_concurrency`; the permit is
//! released before the retry backoff sleep. A failing source never cancels
//! its siblings. `execute` always returns a structured result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use harvester_shared::{
    AppConfig, ContentItem, ExecutionState, IngestionPlan, IngestionResult, IngestionSource,
    Result, SourceBatch, SourceError, SourceKind, SourceStatus,
};
use harvester_sources::{AdapterRegistry, SourceAdapter};

use crate::dedup::Deduplicator;
use crate::plan::{PlanBuilder, PlanContext};
use crate::quality::{self, KeywordScorer, QualityScorer};
use crate::retry::{RetryFailure, RetryPolicy, execute_with_retry};
use crate::sink::ResultSink;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting execution status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a source task is spawned.
    fn source_dispatched(&self, kind: SourceKind);
    /// Called once per source, in plan order, when its outcome is known.
    fn source_finished(&self, kind: SourceKind, status: &SourceStatus);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_dispatched(&self, _kind: SourceKind) {}
    fn source_finished(&self, _kind: SourceKind, _status: &SourceStatus) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Executes ingestion plans against a set of registered adapters.
#[derive(Clone)]
pub struct Orchestrator {
    registry: AdapterRegistry,
    planner: PlanBuilder,
    retry: RetryPolicy,
    deduplicator: Deduplicator,
    /// `None` scores with a [`KeywordScorer`] for the plan topic.
    scorer: Option<Arc<dyn QualityScorer>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .field("deduplicator", &self.deduplicator)
            .field("scorer", &self.scorer.as_ref().map(|s| s.name().to_string()))
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator with default retry, dedup and plan settings.
    pub fn new(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            planner: PlanBuilder::default(),
            retry: RetryPolicy::default(),
            deduplicator: Deduplicator::default(),
            scorer: None,
            sink: None,
        }
    }

    /// Orchestrator with the built-in adapters and every setting taken
    /// from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            registry: AdapterRegistry::from_config(config)?,
            planner: PlanBuilder::from_config(config),
            retry: RetryPolicy::from(&config.retry),
            deduplicator: Deduplicator::new(config.dedup.similarity_threshold),
            scorer: None,
            sink: None,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deduplicator(mut self, deduplicator: Deduplicator) -> Self {
        self.deduplicator = deduplicator;
        self
    }

    pub fn with_planner(mut self, planner: PlanBuilder) -> Self {
        self.planner = planner;
        self
    }

    pub fn planner(&self) -> &PlanBuilder {
        &self.planner
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Build a plan for `topic` and execute it.
    ///
    /// Fails only with [`HarvesterError::InvalidPlan`](harvester_shared::HarvesterError)
    /// before any network call.
    pub async fn create_and_run(&self, topic: &str, ctx: &PlanContext) -> Result<IngestionResult> {
        let plan = self.planner.build(topic, ctx)?;
        Ok(self.execute(&plan).await)
    }

    /// Execute `plan`. Never fails; every source failure is recorded in
    /// the result.
    pub async fn execute(&self, plan: &IngestionPlan) -> IngestionResult {
        self.execute_with_progress(plan, &SilentProgress).await
    }

    #[instrument(skip_all, fields(plan_id = %plan.id, topic = %plan.topic))]
    pub async fn execute_with_progress(
        &self,
        plan: &IngestionPlan,
        progress: &dyn ProgressReporter,
    ) -> IngestionResult {
        let start = Instant::now();
        info!(
            sources = plan.sources.len(),
            max_concurrency = plan.max_concurrency,
            quality_threshold = plan.quality_threshold,
            "executing plan"
        );
        debug!(from = ?ExecutionState::Planned, to = ?ExecutionState::Executing, "state transition");

        // --- Dispatch ---
        progress.phase("Fetching sources");
        let limiter = Arc::new(Semaphore::new(plan.max_concurrency.max(1)));
        let deadline = plan.deadline.map(|d| tokio::time::Instant::now() + d);

        let mut tasks: Vec<SourceTask> = Vec::with_capacity(plan.sources.len());
        for source in &plan.sources {
            let kind = source.kind();
            let attempts = Arc::new(AtomicU32::new(0));
            let handle = self.registry.get(kind).map(|adapter| {
                progress.source_dispatched(kind);
                tokio::spawn(run_source(
                    adapter,
                    source.clone(),
                    self.retry,
                    Arc::clone(&limiter),
                    Arc::clone(&attempts),
                ))
            });
            tasks.push(SourceTask {
                source,
                handle,
                attempts,
            });
        }

        // --- Collect in plan order ---
        let mut per_source_status = BTreeMap::new();
        let mut batches: Vec<Vec<ContentItem>> = Vec::with_capacity(tasks.len());
        let mut partial = false;

        for task in tasks {
            let source = task.source;
            let kind = source.kind();
            let outcome = task.wait(deadline).await;
            let status = match outcome {
                Ok((batch, attempts)) => {
                    let SourceBatch {
                        mut items,
                        partial: note,
                    } = batch;
                    if items.len() > source.max_results {
                        warn!(
                            source = %kind,
                            returned = items.len(),
                            max_results = source.max_results,
                            "adapter exceeded max_results, truncating"
                        );
                        items.truncate(source.max_results);
                    }
                    if let Some(reason) = &note {
                        warn!(source = %kind, reason = %reason, "source returned partial results");
                        partial = true;
                    }
                    let status = SourceStatus::succeeded(items.len(), attempts, note);
                    batches.push(items);
                    status
                }
                Err(RetryFailure { error, attempts }) => {
                    warn!(source = %kind, kind = %error.kind(), error = %error, attempts, "source failed");
                    SourceStatus::failed(&error, attempts)
                }
            };
            progress.source_finished(kind, &status);
            per_source_status.insert(kind, status);
        }

        let succeeded = per_source_status.values().filter(|s| !s.is_failed()).count();
        let failed = per_source_status.len() - succeeded;
        let state = if succeeded == 0 {
            ExecutionState::Failed
        } else if failed == 0 && !partial {
            ExecutionState::Completed
        } else {
            ExecutionState::PartiallyCompleted
        };

        // --- Post-process ---
        let items = if state == ExecutionState::Failed {
            Vec::new()
        } else {
            let merged: Vec<ContentItem> = batches.into_iter().flatten().collect();
            let fetched = merged.len();

            progress.phase("Removing duplicates");
            let unique = self.deduplicator.dedupe(merged);

            progress.phase("Scoring quality");
            let scorer: Arc<dyn QualityScorer> = match &self.scorer {
                Some(s) => Arc::clone(s),
                None => Arc::new(KeywordScorer::for_topic(&plan.topic)),
            };
            let unique_count = unique.len();
            let kept =
                quality::filter(unique, plan.quality_threshold, scorer, plan.max_concurrency).await;
            debug!(fetched, unique = unique_count, kept = kept.len(), "post-processing complete");
            kept
        };

        let result = IngestionResult {
            plan_id: plan.id,
            topic: plan.topic.clone(),
            state,
            items,
            per_source_status,
            total_duration: start.elapsed(),
            success: state != ExecutionState::Failed,
        };

        info!(
            state = ?result.state,
            items = result.items.len(),
            succeeded,
            failed,
            duration_ms = result.total_duration.as_millis() as u64,
            "plan finished"
        );

        if let Some(sink) = &self.sink {
            progress.phase("Persisting result");
            if let Err(e) = sink.persist(&result).await {
                warn!(error = %e, "result sink failed");
            }
        }

        result
    }
}

// ---------------------------------------------------------------------------
// Per-source task
// ---------------------------------------------------------------------------

type SourceOutput = std::result::Result<(SourceBatch, u32), RetryFailure>;

struct SourceTask<'a> {
    source: &'a IngestionSource,
    /// `None` when no adapter is registered for the source kind.
    handle: Option<JoinHandle<SourceOutput>>,
    /// Latest attempt number, readable after an abort.
    attempts: Arc<AtomicU32>,
}

impl SourceTask<'_> {
    async fn wait(self, deadline: Option<tokio::time::Instant>) -> SourceOutput {
        let kind = self.source.kind();
        let Some(mut handle) = self.handle else {
            return Err(RetryFailure {
                error: SourceError::Unreachable(format!("no adapter registered for source '{kind}'")),
                attempts: 0,
            });
        };

        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    warn!(source = %kind, "plan deadline exceeded, abandoning source");
                    return Err(RetryFailure {
                        error: SourceError::Timeout("plan deadline exceeded".into()),
                        attempts: self.attempts.load(Ordering::SeqCst),
                    });
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| {
            Err(RetryFailure {
                error: SourceError::Unreachable(format!("source task ended abnormally: {e}")),
                attempts: self.attempts.load(Ordering::SeqCst),
            })
        })
    }
}

/// Fetch one source under the retry policy, one limiter permit per attempt.
#[instrument(skip_all, fields(source = %source.kind(), adapter = adapter.name()))]
async fn run_source(
    adapter: Arc<dyn SourceAdapter>,
    source: IngestionSource,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
    attempts: Arc<AtomicU32>,
) -> SourceOutput {
    let adapter: &dyn SourceAdapter = adapter.as_ref();
    let source = &source;
    let limiter = limiter.as_ref();
    let attempts = attempts.as_ref();

    execute_with_retry(&retry, |attempt| async move {
        let _permit = limiter
            .acquire()
            .await
            .map_err(|_| SourceError::Unreachable("concurrency limiter closed".into()))?;
        // Only attempts that reached the adapter count
        attempts.store(attempt, Ordering::SeqCst);
        debug!(attempt, "fetching");

        match tokio::time::timeout(
            source.timeout,
            adapter.fetch(&source.query, source.max_results, source.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(format!(
                "no response within {}ms",
                source.timeout.as_millis()
            ))),
        }
    })
    .await
}
