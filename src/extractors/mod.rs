//! Extraction collaborators.
//!
//! The pipeline only cares about two contracts: text extraction mapping a
//! local file to `{text, page_count}`, and table extraction mapping
//! `(doc_id, raw_path)` to an output location. The default text extractor
//! shells out to `pdftotext`; table extraction is normally delegated to
//! the out-of-process worker via the queue, so the in-process
//! implementation here is a stub that reports its own absence.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("required tool '{0}' not found on PATH")]
    ToolMissing(&'static str),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: &'static str, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text pulled out of one document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: u32,
}

/// Table-extraction outcome. `location` is unset when the document simply
/// has no tables.
#[derive(Debug, Clone, Default)]
pub struct TableOutcome {
    pub location: Option<String>,
    pub note: Option<String>,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractorError>;
}

#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract(&self, doc_id: &str, raw_path: &Path)
        -> Result<TableOutcome, ExtractorError>;
}

/// Text extraction via the poppler `pdftotext` tool.
pub struct PdftotextExtractor;

impl PdftotextExtractor {
    /// Check the tool is installed before committing to an extract pass.
    pub fn available() -> bool {
        which::which("pdftotext").is_ok()
    }
}

#[async_trait]
impl TextExtractor for PdftotextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractorError> {
        if !Self::available() {
            return Err(ExtractorError::ToolMissing("pdftotext"));
        }
        if !path.exists() {
            return Err(ExtractorError::FileNotFound(path.display().to_string()));
        }

        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg("-")
            .output()
            .await?;
        if !output.status.success() {
            return Err(ExtractorError::ToolFailed {
                tool: "pdftotext",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        // pdftotext separates pages with form feeds
        let page_count = (text.matches('\u{c}').count() as u32).max(1);
        debug!(path = %path.display(), page_count, "extracted text");
        Ok(ExtractedText { text, page_count })
    }
}

/// In-process stand-in for the external table worker. Always reports that
/// table extraction is handled elsewhere.
pub struct NoopTableExtractor;

#[async_trait]
impl TableExtractor for NoopTableExtractor {
    async fn extract(
        &self,
        _doc_id: &str,
        raw_path: &Path,
    ) -> Result<TableOutcome, ExtractorError> {
        if !raw_path.exists() {
            return Err(ExtractorError::FileNotFound(raw_path.display().to_string()));
        }
        Ok(TableOutcome {
            location: None,
            note: Some("table extraction delegated to async worker".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_table_extractor_requires_file() {
        let extractor = NoopTableExtractor;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");

        let err = extractor.extract("d1", &path).await.unwrap_err();
        assert!(matches!(err, ExtractorError::FileNotFound(_)));

        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let outcome = extractor.extract("d1", &path).await.unwrap();
        assert!(outcome.location.is_none());
        assert!(outcome.note.is_some());
    }

    #[tokio::test]
    async fn test_pdftotext_missing_file() {
        if !PdftotextExtractor::available() {
            return;
        }
        let err = PdftotextExtractor
            .extract(Path::new("/no/such/file.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::FileNotFound(_)));
    }
}
