//! Stage result writes.
//!
//! Attempt counters follow one rule everywhere: when the caller reports a
//! higher attempt number than the stored one, adopt it; otherwise increment
//! by one. Failed attempts never erase integrity fields from an earlier
//! successful download.

use crate::models::{
    DownloadRecord, DownloadStatus, ExtractionRecord, ExtractionStatus, PERMANENT_404_MARKER,
};
use crate::repository::{now_ts, with_retry, Result};

use super::DocumentRepository;

const BUMP_DOWNLOAD_ATTEMPTS: &str =
    "CASE WHEN ?2 > attempts_download THEN ?2 ELSE attempts_download + 1 END";
const BUMP_EXTRACT_ATTEMPTS: &str =
    "CASE WHEN ?2 > attempts_extract THEN ?2 ELSE attempts_extract + 1 END";

impl DocumentRepository {
    /// Record the terminal outcome of one download pass.
    pub fn mark_download_result(&self, record: &DownloadRecord) -> Result<()> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            match record.status {
                DownloadStatus::DownloadedOk | DownloadStatus::Skipped => {
                    // A skip (remote 304) carries no new integrity values,
                    // so COALESCE keeps what the earlier download recorded.
                    let fresh = record.status == DownloadStatus::DownloadedOk;
                    let sql = format!(
                        "UPDATE documents SET
                             last_status = 'downloaded_ok',
                             sha256 = COALESCE(?3, sha256),
                             bytes = COALESCE(?4, bytes),
                             content_type = COALESCE(?5, content_type),
                             raw_location = COALESCE(?6, raw_location),
                             etag = COALESCE(?7, etag),
                             last_modified = COALESCE(?8, last_modified),
                             error = NULL,
                             attempts_download = {BUMP_DOWNLOAD_ATTEMPTS},
                             last_checked_at = ?9,
                             last_download_at = COALESCE(?10, last_download_at),
                             updated_at = ?9
                         WHERE doc_id = ?1"
                    );
                    conn.execute(
                        &sql,
                        rusqlite::params![
                            record.doc_id,
                            record.attempt,
                            record.sha256,
                            record.bytes,
                            record.content_type,
                            record.raw_location,
                            record.etag,
                            record.last_modified,
                            now,
                            fresh.then(|| now.clone()),
                        ],
                    )?;
                }
                DownloadStatus::DownloadFailed => {
                    let sql = format!(
                        "UPDATE documents SET
                             last_status = 'download_failed',
                             error = ?3,
                             attempts_download = {BUMP_DOWNLOAD_ATTEMPTS},
                             updated_at = ?4
                         WHERE doc_id = ?1"
                    );
                    conn.execute(
                        &sql,
                        rusqlite::params![record.doc_id, record.attempt, record.error, now],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Record the terminal outcome of one extraction pass.
    pub fn mark_extraction_result(&self, record: &ExtractionRecord) -> Result<()> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            match record.status {
                ExtractionStatus::ExtractedOk => {
                    let sql = format!(
                        "UPDATE documents SET
                             last_status = 'extracted_ok',
                             extracted_text_location = COALESCE(?3, extracted_text_location),
                             extracted_tables_location = COALESCE(?4, extracted_tables_location),
                             error = NULL,
                             attempts_extract = {BUMP_EXTRACT_ATTEMPTS},
                             updated_at = ?5
                         WHERE doc_id = ?1"
                    );
                    conn.execute(
                        &sql,
                        rusqlite::params![
                            record.doc_id,
                            record.attempt,
                            record.text_location,
                            record.tables_location,
                            now,
                        ],
                    )?;
                }
                ExtractionStatus::ExtractedFailed => {
                    let sql = format!(
                        "UPDATE documents SET
                             last_status = 'extracted_failed',
                             error = ?3,
                             attempts_extract = {BUMP_EXTRACT_ATTEMPTS},
                             updated_at = ?4
                         WHERE doc_id = ?1"
                    );
                    conn.execute(
                        &sql,
                        rusqlite::params![record.doc_id, record.attempt, record.error, now],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Remote probe confirmed the stored copy is current. Refresh the
    /// validators and the check timestamp; status stays put.
    pub fn mark_remote_unchanged(
        &self,
        doc_id: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<()> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            conn.execute(
                "UPDATE documents SET
                     etag = COALESCE(?2, etag),
                     last_modified = COALESCE(?3, last_modified),
                     last_checked_at = ?4,
                     updated_at = ?4
                 WHERE doc_id = ?1",
                rusqlite::params![doc_id, etag, last_modified, now],
            )?;
            Ok(())
        })
    }

    /// Remote probe saw different content. Reopen the document so the next
    /// download pass refetches it; the stale raw file stays until then.
    pub fn mark_remote_changed(&self, doc_id: &str) -> Result<()> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            conn.execute(
                "UPDATE documents SET
                     last_status = 'discovered',
                     error = 'remote_changed',
                     last_checked_at = ?2,
                     updated_at = ?2
                 WHERE doc_id = ?1",
                rusqlite::params![doc_id, now],
            )?;
            Ok(())
        })
    }

    /// The raw file recorded for this document is gone from disk. Clear
    /// the integrity fields and reopen for redownload, stamping the check
    /// time like the remote probes do.
    pub fn mark_raw_missing(&self, doc_id: &str) -> Result<()> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            conn.execute(
                "UPDATE documents SET
                     last_status = 'discovered',
                     raw_location = NULL,
                     sha256 = NULL,
                     bytes = NULL,
                     content_type = NULL,
                     error = 'raw_missing',
                     last_checked_at = ?2,
                     updated_at = ?2
                 WHERE doc_id = ?1",
                rusqlite::params![doc_id, now],
            )?;
            Ok(())
        })
    }
}
