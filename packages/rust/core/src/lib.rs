//! Ingestion orchestration for Harvester.
//!
//! This crate turns a topic into an [`IngestionPlan`](harvester_shared::IngestionPlan),
//! runs it against the source adapters under bounded concurrency with
//! retry/backoff, then deduplicates and quality-filters the merged items.

pub mod dedup;
pub mod orchestrator;
pub mod plan;
pub mod quality;
pub mod retry;
pub mod sink;

pub use dedup::{DEFAULT_SIMILARITY_THRESHOLD, Deduplicator, dedupe, similarity};
pub use orchestrator::{Orchestrator, ProgressReporter, SilentProgress};
pub use plan::{PlanBuilder, PlanContext, PlanDefaults, build_plan, topic_url};
pub use quality::{FnScorer, KeywordScorer, QualityScorer, ScoreError, filter};
pub use retry::{RetryFailure, RetryPolicy, execute_with_retry};
pub use sink::{JsonFileSink, ResultSink};
