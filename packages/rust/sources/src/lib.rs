//! Source adapters for the ingestion orchestrator.
//!
//! This crate provides:
//! - [`SourceAdapter`], the uniform capability every source implements
//! - [`AdapterRegistry`], adapters keyed by [`SourceKind`](harvester_shared::SourceKind)
//! - Built-in adapters: [`WebAdapter`], [`ArxivAdapter`], [`PubmedAdapter`]
//! - [`extract`], main-content extraction from HTML pages

pub mod adapters;
pub mod extract;
mod http;

pub use adapters::{AdapterRegistry, ArxivAdapter, PubmedAdapter, SourceAdapter, WebAdapter};
pub use extract::{ExtractedPage, extract_page};
