//! Document model and per-stage result records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Error marker recorded for permanent 404 failures. Documents carrying this
/// marker are excluded from download retry eligibility.
pub const PERMANENT_404_MARKER: &str = "http_404";

/// Lifecycle status of a document, driving all pending-work queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    /// Discovered but not yet downloaded (or reopened for redownload).
    Discovered,
    /// Binary fetched, verified, and stored on disk.
    DownloadedOk,
    /// Download failed (retriable unless the error is a permanent marker).
    DownloadFailed,
    /// Extraction completed.
    ExtractedOk,
    /// Extraction failed (retriable until attempts are exhausted).
    ExtractedFailed,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Discovered => "discovered",
            DocStatus::DownloadedOk => "downloaded_ok",
            DocStatus::DownloadFailed => "download_failed",
            DocStatus::ExtractedOk => "extracted_ok",
            DocStatus::ExtractedFailed => "extracted_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(DocStatus::Discovered),
            "downloaded_ok" => Some(DocStatus::DownloadedOk),
            "download_failed" => Some(DocStatus::DownloadFailed),
            "extracted_ok" => Some(DocStatus::ExtractedOk),
            "extracted_failed" => Some(DocStatus::ExtractedFailed),
            _ => None,
        }
    }
}

/// Compute the deterministic document id for a canonical URL.
///
/// Re-discovering the same URL always maps to the same id, which is what
/// makes discovery idempotent.
pub fn doc_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// A document link produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredItem {
    pub url: String,
    pub title: String,
    pub year: Option<i32>,
    pub month: Option<i32>,
    /// Listing page the link was found on.
    pub source_page_url: Option<String>,
}

/// One row per discovered document. Never deleted; reruns converge on the
/// same row via the deterministic id.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: String,
    pub url: String,
    pub title: String,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub source_page_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_status: Option<DocStatus>,
    // Integrity
    pub sha256: Option<String>,
    pub bytes: Option<i64>,
    pub content_type: Option<String>,
    pub raw_location: Option<String>,
    // Cache validators
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_download_at: Option<DateTime<Utc>>,
    // Extraction outputs
    pub extracted_text_location: Option<String>,
    pub extracted_tables_location: Option<String>,
    pub error: Option<String>,
    pub attempts_download: u32,
    pub attempts_extract: u32,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a single download stage pass over one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Fetched and written to disk.
    DownloadedOk,
    /// Remote content unchanged (304); existing file kept.
    Skipped,
    /// Attempt loop ended without a usable file.
    DownloadFailed,
}

/// Terminal per-run download outcome for one document.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRecord {
    pub doc_id: String,
    pub status: DownloadStatus,
    /// Attempt number that produced this outcome.
    pub attempt: u32,
    pub sha256: Option<String>,
    pub bytes: Option<i64>,
    pub content_type: Option<String>,
    pub raw_location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub error: Option<String>,
}

impl DownloadRecord {
    /// A failure record carrying only the error and attempt number.
    pub fn failed(doc_id: &str, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            status: DownloadStatus::DownloadFailed,
            attempt,
            sha256: None,
            bytes: None,
            content_type: None,
            raw_location: None,
            etag: None,
            last_modified: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a single extract stage pass over one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    ExtractedOk,
    ExtractedFailed,
}

/// Terminal per-run extraction outcome for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRecord {
    pub doc_id: String,
    pub status: ExtractionStatus,
    pub attempt: u32,
    pub text_location: Option<String>,
    pub tables_location: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_is_pure_and_fixed_width() {
        let a = doc_id_for_url("https://x/a.pdf");
        let b = doc_id_for_url("https://x/a.pdf");
        let c = doc_id_for_url("https://x/b.pdf");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocStatus::Discovered,
            DocStatus::DownloadedOk,
            DocStatus::DownloadFailed,
            DocStatus::ExtractedOk,
            DocStatus::ExtractedFailed,
        ] {
            assert_eq!(DocStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(DocStatus::from_str("bogus"), None);
    }
}
