//! Shared types, error model, and configuration for Harvester.
//!
//! This crate is the foundation depended on by all other Harvester crates.
//! It provides:
//! - [`HarvesterError`] and [`SourceError`], the error model
//! - Domain types ([`ContentItem`], [`IngestionPlan`], [`IngestionResult`], ...)
//! - Configuration ([`AppConfig`], config loading)
//! - Text normalization used for keywords, scoring and dedup

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AcademicConfig, AppConfig, BiomedicalConfig, DedupConfig, DefaultsConfig, MAX_PUBMED_BATCH,
    RetryConfig, WebConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key,
};
pub use error::{HarvesterError, Result, SourceError, SourceErrorKind};
pub use types::{
    ContentItem, ExecutionState, IngestionPlan, IngestionResult, IngestionSource, PlanId,
    SourceBatch, SourceFailure, SourceKind, SourceOutcome, SourceQuery, SourceStatus,
};
