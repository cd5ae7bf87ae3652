//! Document store: one row per discovered document, carrying the full
//! lifecycle state the stage runners key off.

use std::path::PathBuf;

use chrono::DateTime;
use rusqlite::Row;

use crate::models::{DocStatus, Document};
use crate::repository::{connect, parse_ts_opt, Result};

mod pending;
mod results;
mod stats;
mod upsert;

pub use stats::StoreStats;

/// Repository over the `documents` table. Cheap to clone; each operation
/// opens its own connection.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    db_path: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    doc_id                     TEXT PRIMARY KEY,
    url                        TEXT NOT NULL,
    title                      TEXT NOT NULL DEFAULT '',
    year                       INTEGER,
    month                      INTEGER,
    source_page_url            TEXT,
    first_seen_at              TEXT NOT NULL,
    last_seen_at               TEXT NOT NULL,
    last_status                TEXT,
    sha256                     TEXT,
    bytes                      INTEGER,
    content_type               TEXT,
    raw_location               TEXT,
    etag                       TEXT,
    last_modified              TEXT,
    last_checked_at            TEXT,
    last_download_at           TEXT,
    extracted_text_location    TEXT,
    extracted_tables_location  TEXT,
    error                      TEXT,
    attempts_download          INTEGER NOT NULL DEFAULT 0,
    attempts_extract           INTEGER NOT NULL DEFAULT 0,
    updated_at                 TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_last_status ON documents(last_status);
CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at);
";

pub(crate) const DOCUMENT_COLUMNS: &str = "doc_id, url, title, year, month, source_page_url, \
     first_seen_at, last_seen_at, last_status, sha256, bytes, content_type, raw_location, \
     etag, last_modified, last_checked_at, last_download_at, extracted_text_location, \
     extracted_tables_location, error, attempts_download, attempts_extract, updated_at";

impl DocumentRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Create the schema if it does not exist yet. Safe to call repeatedly.
    pub fn init(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<rusqlite::Connection> {
        connect(&self.db_path)
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE doc_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([doc_id], row_to_document)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let status: Option<String> = row.get("last_status")?;
    Ok(Document {
        doc_id: row.get("doc_id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        year: row.get("year")?,
        month: row.get("month")?,
        source_page_url: row.get("source_page_url")?,
        first_seen_at: parse_ts_opt(row.get("first_seen_at")?).unwrap_or(DateTime::UNIX_EPOCH),
        last_seen_at: parse_ts_opt(row.get("last_seen_at")?).unwrap_or(DateTime::UNIX_EPOCH),
        last_status: status.as_deref().and_then(DocStatus::from_str),
        sha256: row.get("sha256")?,
        bytes: row.get("bytes")?,
        content_type: row.get("content_type")?,
        raw_location: row.get("raw_location")?,
        etag: row.get("etag")?,
        last_modified: row.get("last_modified")?,
        last_checked_at: parse_ts_opt(row.get("last_checked_at")?),
        last_download_at: parse_ts_opt(row.get("last_download_at")?),
        extracted_text_location: row.get("extracted_text_location")?,
        extracted_tables_location: row.get("extracted_tables_location")?,
        error: row.get("error")?,
        attempts_download: row.get::<_, i64>("attempts_download")? as u32,
        attempts_extract: row.get::<_, i64>("attempts_extract")? as u32,
        updated_at: parse_ts_opt(row.get("updated_at")?).unwrap_or(DateTime::UNIX_EPOCH),
    })
}
