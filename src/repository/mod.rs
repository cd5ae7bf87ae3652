//! SQLite persistence layer.
//!
//! Each repository owns a database path and opens a fresh connection per
//! operation. Connections run in WAL mode with a busy timeout so the
//! download and extract stages can write concurrently; on top of that,
//! [`with_retry`] re-runs an operation a few times when SQLite still
//! reports the database as busy.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

mod document;
mod jobs;
mod runs;

pub use document::{DocumentRepository, StoreStats};
pub use jobs::{JobCounts, JobRepository};
pub use runs::RunRepository;

const BUSY_TIMEOUT_MS: u64 = 5_000;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with the pragmas every repository relies on.
pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

/// Run an operation, retrying on SQLITE_BUSY with a short linear backoff.
pub fn with_retry<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Err(RepositoryError::Sqlite(err)) if is_busy(&err) && attempt < RETRY_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
            }
            other => return other,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Canonical timestamp encoding: RFC 3339, UTC, second precision. The
/// lexicographic order of encoded values matches chronological order, which
/// the pending-work queries rely on.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_ts() -> String {
    fmt_ts(Utc::now())
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let encoded = fmt_ts(ts);
        assert_eq!(encoded, "2026-03-14T09:26:53Z");
        assert_eq!(parse_ts(&encoded), Some(ts));
    }

    #[test]
    fn test_encoded_timestamps_sort_chronologically() {
        let early = fmt_ts(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        let late = fmt_ts(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap());
        assert!(early < late);
    }

    #[test]
    fn test_with_retry_gives_up_after_non_busy_error() {
        let mut calls = 0;
        let result: Result<()> = with_retry(|| {
            calls += 1;
            Err(RepositoryError::Invalid("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
