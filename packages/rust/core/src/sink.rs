//! Optional persistence collaborator for finished results.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use harvester_shared::{HarvesterError, IngestionResult, Result};
use tracing::info;

/// Receives every finished [`IngestionResult`] for durable storage.
///
/// The orchestrator works without a sink; a failing sink is logged and
/// never changes the returned result.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, result: &IngestionResult) -> Result<()>;
}

/// Writes the result as pretty-printed JSON to a file, creating parent
/// directories as needed.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, result: &IngestionResult) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HarvesterError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(result)
            .map_err(|e| HarvesterError::parse(format!("failed to serialize result: {e}")))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| HarvesterError::io(&self.path, e))?;

        info!(path = %self.path.display(), items = result.items.len(), "result written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use harvester_shared::{ContentItem, ExecutionState, PlanId, SourceKind, SourceStatus};

    #[tokio::test]
    async fn writes_json_result() {
        let dir = std::env::temp_dir().join(format!("harvester-sink-{}", PlanId::new()));
        let path = dir.join("nested").join("result.json");

        let result = IngestionResult {
            plan_id: PlanId::new(),
            topic: "gut microbiome".into(),
            state: ExecutionState::Completed,
            items: vec![
                ContentItem::new(SourceKind::Academic, "Title", "Body", "arxiv:1")
                    .with_quality_score(0.8),
            ],
            per_source_status: BTreeMap::from([(
                SourceKind::Academic,
                SourceStatus::succeeded(1, 1, None),
            )]),
            total_duration: Duration::from_millis(1500),
            success: true,
        };

        JsonFileSink::new(&path).persist(&result).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["state"], "completed");
        assert_eq!(value["total_duration_ms"], 1500);
        assert_eq!(value["items"][0]["quality_score"], 0.8);
        assert_eq!(value["per_source_status"]["academic"]["outcome"], "success");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
