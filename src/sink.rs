//! Transport sinks for pipeline events.
//!
//! Sinks mirror what happened to downstream consumers; they are never part
//! of the state machine. A sink failure is the caller's to log and shrug
//! off, because the store already holds the truth.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::models::{DiscoveredItem, DownloadRecord, ExtractionRecord};
use crate::repository::now_ts;

/// Batch-accepting event sink.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish_discovered(&self, items: &[DiscoveredItem]) -> anyhow::Result<()>;
    async fn publish_download_results(&self, records: &[DownloadRecord]) -> anyhow::Result<()>;
    async fn publish_extraction_results(&self, records: &[ExtractionRecord])
        -> anyhow::Result<()>;
}

/// Discards everything.
pub struct NoopSink;

#[async_trait]
impl Sink for NoopSink {
    async fn publish_discovered(&self, _items: &[DiscoveredItem]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_download_results(&self, _records: &[DownloadRecord]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_extraction_results(
        &self,
        _records: &[ExtractionRecord],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per event to a local file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append<T: Serialize>(&self, event: &str, batch: &[T]) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut out = String::new();
        for item in batch {
            let line = json!({
                "event": event,
                "at": now_ts(),
                "data": item,
            });
            out.push_str(&serde_json::to_string(&line)?);
            out.push('\n');
        }
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for JsonlSink {
    async fn publish_discovered(&self, items: &[DiscoveredItem]) -> anyhow::Result<()> {
        self.append("discovered", items).await
    }

    async fn publish_download_results(&self, records: &[DownloadRecord]) -> anyhow::Result<()> {
        self.append("download_result", records).await
    }

    async fn publish_extraction_results(
        &self,
        records: &[ExtractionRecord],
    ) -> anyhow::Result<()> {
        self.append("extraction_result", records).await
    }
}

/// Build a sink from its config spec. `None` means no-op; `jsonl:<path>`
/// appends to the given file. Relative paths resolve under `data_dir`.
pub fn sink_from_spec(spec: Option<&str>, data_dir: &Path) -> anyhow::Result<Box<dyn Sink>> {
    match spec {
        None => Ok(Box::new(NoopSink)),
        Some(spec) => match spec.split_once(':') {
            Some(("jsonl", path)) if !path.is_empty() => {
                let path = Path::new(path);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    data_dir.join(path)
                };
                Ok(Box::new(JsonlSink::new(path)))
            }
            _ => anyhow::bail!("unsupported sink spec '{spec}' (expected 'jsonl:<path>')"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jsonl_sink_appends_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlSink::new(&path);

        sink.publish_discovered(&[DiscoveredItem {
            url: "https://x/a.pdf".to_string(),
            title: "A".to_string(),
            year: Some(2026),
            month: None,
            source_page_url: None,
        }])
        .await
        .unwrap();
        sink.publish_download_results(&[DownloadRecord::failed("d1", 1, "http_500")])
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "discovered");
        assert_eq!(first["data"]["url"], "https://x/a.pdf");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "download_result");
        assert_eq!(second["data"]["status"], "download_failed");
    }

    #[test]
    fn test_sink_from_spec() {
        let data_dir = Path::new("/var/lib/docpipe");
        assert!(sink_from_spec(None, data_dir).is_ok());
        assert!(sink_from_spec(Some("jsonl:events.jsonl"), data_dir).is_ok());
        assert!(sink_from_spec(Some("kafka:topic"), data_dir).is_err());
        assert!(sink_from_spec(Some("jsonl:"), data_dir).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlSink::new(&path);
        sink.publish_discovered(&[]).await.unwrap();
        assert!(!path.exists());
    }
}
