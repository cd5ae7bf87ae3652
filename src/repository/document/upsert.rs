//! Idempotent discovery writes.

use crate::models::DiscoveredItem;
use crate::repository::{now_ts, with_retry, Result};

use super::DocumentRepository;

impl DocumentRepository {
    /// Record a discovered document. New URLs insert a fresh row in the
    /// `discovered` state; re-discovered URLs refresh the descriptive
    /// metadata and bump `last_seen_at`, but never touch download or
    /// extraction progress.
    ///
    /// Returns true when the row was newly inserted.
    pub fn upsert_discovered(&self, doc_id: &str, item: &DiscoveredItem) -> Result<bool> {
        with_retry(|| {
            let conn = self.conn()?;
            let now = now_ts();
            let existed: bool = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE doc_id = ?1",
                    [doc_id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            conn.execute(
                "INSERT INTO documents (
                     doc_id, url, title, year, month, source_page_url,
                     first_seen_at, last_seen_at, last_status, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 'discovered', ?7)
                 ON CONFLICT(doc_id) DO UPDATE SET
                     url = excluded.url,
                     title = excluded.title,
                     year = excluded.year,
                     month = excluded.month,
                     source_page_url = excluded.source_page_url,
                     last_seen_at = excluded.last_seen_at,
                     last_status = COALESCE(documents.last_status, 'discovered'),
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    doc_id,
                    item.url,
                    item.title,
                    item.year,
                    item.month,
                    item.source_page_url,
                    now,
                ],
            )?;
            Ok(!existed)
        })
    }
}
