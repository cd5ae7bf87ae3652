//! Pending-work queries for the stage runners.
//!
//! Eligibility is derived entirely from row state, never from in-memory
//! bookkeeping, so a crashed run resumes by simply re-running the stage.

use chrono::{DateTime, Utc};

use crate::models::Document;
use crate::repository::{fmt_ts, Result};

use super::{row_to_document, DocumentRepository, DOCUMENT_COLUMNS};

/// Documents eligible for the download stage. Oldest-updated first, so
/// stalled documents get picked up before recently touched ones.
const PENDING_DOWNLOADS_SQL: &str = "\
    (last_status IS NULL
     OR last_status = 'discovered'
     OR (last_status = 'download_failed'
         AND (error IS NULL OR error NOT LIKE '%http_404%'))
     OR (last_status = 'downloaded_ok'
         AND (sha256 IS NULL OR raw_location IS NULL)))
    AND attempts_download < ?1";

impl DocumentRepository {
    pub fn list_pending_downloads(
        &self,
        limit: usize,
        max_attempts: u32,
        force: bool,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let sql = if force {
            format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 ORDER BY updated_at ASC LIMIT ?2"
            )
        } else {
            format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE {PENDING_DOWNLOADS_SQL} \
                 ORDER BY updated_at ASC LIMIT ?2"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![max_attempts, limit as i64],
            row_to_document,
        )?;
        collect(rows)
    }

    /// Documents with a raw file on record that still need extraction.
    /// `force` re-extracts everything that has a raw file, including
    /// documents already extracted.
    pub fn list_pending_extracts(
        &self,
        limit: usize,
        max_attempts: u32,
        force: bool,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let sql = if force {
            format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE raw_location IS NOT NULL \
                 ORDER BY updated_at ASC LIMIT ?2"
            )
        } else {
            format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE raw_location IS NOT NULL \
                   AND (last_status = 'downloaded_ok' \
                        OR (last_status = 'extracted_failed' AND attempts_extract < ?1)) \
                 ORDER BY updated_at ASC LIMIT ?2"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![max_attempts, limit as i64],
            row_to_document,
        )?;
        collect(rows)
    }

    /// Downloaded documents whose remote copy has not been probed since
    /// `checked_before`. Never-checked documents sort first.
    pub fn list_revalidation_candidates(
        &self,
        limit: usize,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE raw_location IS NOT NULL \
               AND last_status IN ('downloaded_ok', 'extracted_ok') \
               AND COALESCE(last_checked_at, '1970-01-01T00:00:00Z') < ?1 \
             ORDER BY COALESCE(last_checked_at, '1970-01-01T00:00:00Z') ASC \
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![fmt_ts(checked_before), limit as i64],
            row_to_document,
        )?;
        collect(rows)
    }

    /// Every document claiming a raw file on disk, for local reconciliation.
    pub fn list_with_raw_location(&self) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE raw_location IS NOT NULL ORDER BY doc_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_document)?;
        collect(rows)
    }
}

fn collect(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Document>>,
) -> Result<Vec<Document>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        doc_id_for_url, DiscoveredItem, DownloadRecord, DownloadStatus, PERMANENT_404_MARKER,
    };
    use tempfile::TempDir;

    fn repo() -> (TempDir, DocumentRepository) {
        let dir = TempDir::new().unwrap();
        let repo = DocumentRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();
        (dir, repo)
    }

    fn seed(repo: &DocumentRepository, url: &str) -> String {
        let doc_id = doc_id_for_url(url);
        repo.upsert_discovered(
            &doc_id,
            &DiscoveredItem {
                url: url.to_string(),
                title: "t".to_string(),
                year: None,
                month: None,
                source_page_url: None,
            },
        )
        .unwrap();
        doc_id
    }

    #[test]
    fn test_permanent_404_excluded_from_pending_downloads() {
        let (_dir, repo) = repo();
        let gone = seed(&repo, "https://site/gone.pdf");
        let flaky = seed(&repo, "https://site/flaky.pdf");

        repo.mark_download_result(&DownloadRecord::failed(
            &gone,
            1,
            format!("{}: https://site/gone.pdf", PERMANENT_404_MARKER),
        ))
        .unwrap();
        repo.mark_download_result(&DownloadRecord::failed(&flaky, 1, "http_503"))
            .unwrap();

        let pending = repo.list_pending_downloads(10, 5, false).unwrap();
        let ids: Vec<_> = pending.iter().map(|d| d.doc_id.as_str()).collect();
        assert!(ids.contains(&flaky.as_str()));
        assert!(!ids.contains(&gone.as_str()));

        // force re-includes both
        let forced = repo.list_pending_downloads(10, 5, true).unwrap();
        assert_eq!(forced.len(), 2);
    }

    #[test]
    fn test_attempt_cap_excludes_exhausted_documents() {
        let (_dir, repo) = repo();
        let doc_id = seed(&repo, "https://site/a.pdf");
        for attempt in 1..=3 {
            repo.mark_download_result(&DownloadRecord::failed(&doc_id, attempt, "http_500"))
                .unwrap();
        }
        assert!(repo.list_pending_downloads(10, 3, false).unwrap().is_empty());
        assert_eq!(repo.list_pending_downloads(10, 4, false).unwrap().len(), 1);
    }

    #[test]
    fn test_revalidation_candidates_require_settled_download() {
        let (_dir, repo) = repo();
        let settled = seed(&repo, "https://site/settled.pdf");
        let failing = seed(&repo, "https://site/failing.pdf");
        for doc_id in [&settled, &failing] {
            repo.mark_download_result(&DownloadRecord {
                doc_id: doc_id.to_string(),
                status: DownloadStatus::DownloadedOk,
                attempt: 1,
                sha256: Some("aa".to_string()),
                bytes: Some(4),
                content_type: None,
                raw_location: Some(format!("/raw/{doc_id}.pdf")),
                etag: None,
                last_modified: None,
                error: None,
            })
            .unwrap();
        }
        repo.mark_extraction_result(&crate::models::ExtractionRecord {
            doc_id: failing.clone(),
            status: crate::models::ExtractionStatus::ExtractedFailed,
            attempt: 1,
            text_location: None,
            tables_location: None,
            error: Some("parse_error: broken xref".to_string()),
        })
        .unwrap();

        // cutoff in the future so freshly checked rows still qualify
        let cutoff = chrono::Utc::now() + chrono::Duration::days(1);
        let ids: Vec<_> = repo
            .list_revalidation_candidates(10, cutoff)
            .unwrap()
            .into_iter()
            .map(|d| d.doc_id)
            .collect();
        assert!(ids.contains(&settled));
        // mid-retry extraction failures are left alone until they settle
        assert!(!ids.contains(&failing));
    }

    #[test]
    fn test_downloaded_without_integrity_is_still_pending() {
        let (_dir, repo) = repo();
        let doc_id = seed(&repo, "https://site/a.pdf");
        // downloaded_ok but no sha256/raw_location recorded
        repo.mark_download_result(&DownloadRecord {
            doc_id: doc_id.clone(),
            status: DownloadStatus::DownloadedOk,
            attempt: 1,
            sha256: None,
            bytes: None,
            content_type: None,
            raw_location: None,
            etag: None,
            last_modified: None,
            error: None,
        })
        .unwrap();
        let pending = repo.list_pending_downloads(10, 5, false).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].doc_id, doc_id);
    }
}
