//! Source adapter trait, registry and the built-in adapters.
//!
//! Every external source is wrapped in a [`SourceAdapter`]: given a query it
//! returns at most `max_results` items or fails with a [`SourceError`].
//! Adapters hold no shared mutable state and are safe to call concurrently.

mod academic;
mod biomedical;
mod web;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester_shared::{AppConfig, Result, SourceBatch, SourceError, SourceKind, SourceQuery};

pub use academic::ArxivAdapter;
pub use biomedical::PubmedAdapter;
pub use web::WebAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform capability wrapping one external source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source kind this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Fetch at most `max_results` items for `query`.
    ///
    /// Every network request carries `timeout`. A batch that knowingly
    /// misses items is returned with [`SourceBatch::partial`] set.
    async fn fetch(
        &self,
        query: &SourceQuery,
        max_results: usize,
        timeout: Duration,
    ) -> std::result::Result<SourceBatch, SourceError>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

/// Error for a query routed to an adapter of a different kind.
pub(crate) fn mismatched_query(expected: SourceKind, query: &SourceQuery) -> SourceError {
    SourceError::InvalidQuery(format!(
        "{expected} adapter received a query for source '{}'",
        query.kind()
    ))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Adapters keyed by the source kind they serve.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in adapters configured from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(WebAdapter::new(&config.web)?));
        registry.register(Arc::new(ArxivAdapter::new(&config.academic, &config.web.user_agent)?));
        registry.register(Arc::new(PubmedAdapter::new(&config.biomedical, &config.web.user_agent)?));
        Ok(registry)
    }

    /// Register `adapter` under its kind, returning any adapter it replaced.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().collect();
        kinds.sort();
        f.debug_struct("AdapterRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_from_default_config_has_all_kinds() {
        let registry = AdapterRegistry::from_config(&AppConfig::default()).unwrap();
        assert_eq!(registry.len(), 3);
        for kind in SourceKind::all() {
            let adapter = registry.get(*kind).expect("adapter registered");
            assert_eq!(adapter.kind(), *kind);
        }
    }

    #[test]
    fn register_replaces_same_kind() {
        let config = AppConfig::default();
        let mut registry = AdapterRegistry::new();
        assert!(registry.is_empty());

        let first = registry.register(Arc::new(WebAdapter::new(&config.web).unwrap()));
        assert!(first.is_none());
        let second = registry.register(Arc::new(WebAdapter::new(&config.web).unwrap()));
        assert!(second.is_some());
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(SourceKind::Academic));
    }

    #[test]
    fn mismatched_query_is_invalid() {
        let query = SourceQuery::Academic {
            categories: vec!["cs.AI".into()],
            keywords: vec![],
            phrase: None,
        };
        let err = mismatched_query(SourceKind::Web, &query);
        assert_eq!(err.to_string(), "invalid query: web adapter received a query for source 'academic'");
    }
}
