//! Asynchronous extract job bookkeeping.
//!
//! Submission is split into two steps so a crash between them is
//! recoverable: `enqueue` records intent idempotently, and `claim_for_publish`
//! atomically leases a batch for publication. A job whose publish never
//! happened (or whose worker died) simply has its lease expire and gets
//! re-claimed by the next submit pass.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use rusqlite::Row;

use crate::models::{ExtractJob, JobStatus};
use crate::repository::{
    connect, fmt_ts, now_ts, parse_ts_opt, with_retry, RepositoryError, Result,
};

#[derive(Debug, Clone)]
pub struct JobRepository {
    db_path: PathBuf,
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: u64,
    pub leased: u64,
    pub completed: u64,
    pub failed: u64,
}

const JOB_COLUMNS: &str = "job_id, run_id, doc_id, raw_pdf_path, file_sha256, attempt, \
     submitted_at, status, lease_until, finished_at, error, result_ref";

impl JobRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn init(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS extract_jobs (
                 job_id       TEXT PRIMARY KEY,
                 run_id       TEXT NOT NULL,
                 doc_id       TEXT NOT NULL,
                 raw_pdf_path TEXT NOT NULL,
                 file_sha256  TEXT,
                 attempt      INTEGER NOT NULL DEFAULT 1,
                 submitted_at TEXT NOT NULL,
                 status       TEXT NOT NULL DEFAULT 'queued',
                 lease_until  TEXT,
                 finished_at  TEXT,
                 error        TEXT,
                 result_ref   TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_extract_jobs_status ON extract_jobs(status);
             CREATE INDEX IF NOT EXISTS idx_extract_jobs_doc ON extract_jobs(doc_id);",
        )?;
        Ok(())
    }

    /// Record the intent to extract. A brand-new job id inserts as queued.
    /// An existing job that already finished (completed or failed) is
    /// re-queued with its attempt counter bumped. An active job is left
    /// untouched.
    ///
    /// Returns true when the job is (re-)queued, false on the no-op path.
    pub fn enqueue(&self, job: &ExtractJob) -> Result<bool> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let changed = conn.execute(
                "INSERT INTO extract_jobs (
                     job_id, run_id, doc_id, raw_pdf_path, file_sha256,
                     attempt, submitted_at, status
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued')
                 ON CONFLICT(job_id) DO UPDATE SET
                     run_id = excluded.run_id,
                     raw_pdf_path = excluded.raw_pdf_path,
                     file_sha256 = excluded.file_sha256,
                     attempt = extract_jobs.attempt + 1,
                     submitted_at = excluded.submitted_at,
                     status = 'queued',
                     lease_until = NULL,
                     finished_at = NULL,
                     error = NULL,
                     result_ref = NULL
                 WHERE extract_jobs.status IN ('completed', 'failed')",
                rusqlite::params![
                    job.job_id,
                    job.run_id,
                    job.doc_id,
                    job.raw_pdf_path,
                    job.file_sha256,
                    job.attempt,
                    fmt_ts(job.submitted_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Atomically lease a batch of publishable jobs: everything queued,
    /// plus leased jobs whose lease has expired. Oldest submissions first.
    pub fn claim_for_publish(&self, limit: usize, lease_secs: u64) -> Result<Vec<ExtractJob>> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let now = now_ts();
            let lease_until = fmt_ts(Utc::now() + Duration::seconds(lease_secs as i64));
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let result = (|| {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM extract_jobs \
                     WHERE status = 'queued' \
                        OR (status = 'leased' AND lease_until < ?1) \
                     ORDER BY submitted_at ASC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params![now, limit as i64], row_to_job)?;
                let mut jobs = Vec::new();
                for row in rows {
                    jobs.push(row?);
                }
                for job in &mut jobs {
                    conn.execute(
                        "UPDATE extract_jobs SET status = 'leased', lease_until = ?2 \
                         WHERE job_id = ?1",
                        rusqlite::params![job.job_id, lease_until],
                    )?;
                    job.status = JobStatus::Leased;
                    job.lease_until = parse_ts_opt(Some(lease_until.clone()));
                }
                Ok::<_, RepositoryError>(jobs)
            })();
            match result {
                Ok(jobs) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(jobs)
                }
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(err)
                }
            }
        })
    }

    pub fn get(&self, job_id: &str) -> Result<Option<ExtractJob>> {
        let conn = connect(&self.db_path)?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM extract_jobs WHERE job_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([job_id], row_to_job)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Close a job with a successful result. Returns false when no such
    /// job exists.
    pub fn mark_completed(&self, job_id: &str, result_ref: Option<&str>) -> Result<bool> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let changed = conn.execute(
                "UPDATE extract_jobs SET status = 'completed', finished_at = ?2, \
                     error = NULL, result_ref = ?3, lease_until = NULL \
                 WHERE job_id = ?1",
                rusqlite::params![job_id, now_ts(), result_ref],
            )?;
            Ok(changed > 0)
        })
    }

    /// Close a job with a failure. Returns false when no such job exists.
    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let changed = conn.execute(
                "UPDATE extract_jobs SET status = 'failed', finished_at = ?2, \
                     error = ?3, lease_until = NULL \
                 WHERE job_id = ?1",
                rusqlite::params![job_id, now_ts(), error],
            )?;
            Ok(changed > 0)
        })
    }

    /// Jobs still in flight (queued, or leased whether or not the lease
    /// expired). The pipeline supervisor keeps polling while this is
    /// nonzero.
    pub fn count_active(&self) -> Result<u64> {
        let conn = connect(&self.db_path)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM extract_jobs WHERE status IN ('queued', 'leased')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn counts(&self) -> Result<JobCounts> {
        let conn = connect(&self.db_path)?;
        let mut counts = JobCounts::default();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM extract_jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "queued" => counts.queued = count,
                "leased" => counts.leased = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ExtractJob> {
    let status: String = row.get("status")?;
    Ok(ExtractJob {
        job_id: row.get("job_id")?,
        run_id: row.get("run_id")?,
        doc_id: row.get("doc_id")?,
        raw_pdf_path: row.get("raw_pdf_path")?,
        file_sha256: row.get("file_sha256")?,
        attempt: row.get::<_, i64>("attempt")? as u32,
        submitted_at: parse_ts_opt(row.get("submitted_at")?)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Queued),
        lease_until: parse_ts_opt(row.get("lease_until")?),
        finished_at: parse_ts_opt(row.get("finished_at")?),
        error: row.get("error")?,
        result_ref: row.get("result_ref")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job_id_for;

    fn repo() -> (tempfile::TempDir, JobRepository) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = JobRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();
        (dir, repo)
    }

    fn job(doc_id: &str, raw: &str) -> ExtractJob {
        ExtractJob {
            job_id: job_id_for(doc_id, raw),
            run_id: "run-test".to_string(),
            doc_id: doc_id.to_string(),
            raw_pdf_path: raw.to_string(),
            file_sha256: Some("aa".to_string()),
            attempt: 1,
            submitted_at: Utc::now(),
            status: JobStatus::Queued,
            lease_until: None,
            finished_at: None,
            error: None,
            result_ref: None,
        }
    }

    #[test]
    fn test_enqueue_is_idempotent_while_active() {
        let (_dir, repo) = repo();
        let j = job("d1", "/raw/d1.pdf");
        assert!(repo.enqueue(&j).unwrap());
        // active job: second enqueue is a no-op
        assert!(!repo.enqueue(&j).unwrap());
        let stored = repo.get(&j.job_id).unwrap().unwrap();
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[test]
    fn test_finished_job_requeues_with_bumped_attempt() {
        let (_dir, repo) = repo();
        let j = job("d1", "/raw/d1.pdf");
        repo.enqueue(&j).unwrap();
        repo.mark_failed(&j.job_id, "parse_error").unwrap();

        assert!(repo.enqueue(&j).unwrap());
        let stored = repo.get(&j.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.error, None);
        assert!(stored.finished_at.is_none());
    }

    #[test]
    fn test_claim_leases_and_skips_active_leases() {
        let (_dir, repo) = repo();
        let a = job("d1", "/raw/d1.pdf");
        let b = job("d2", "/raw/d2.pdf");
        repo.enqueue(&a).unwrap();
        repo.enqueue(&b).unwrap();

        let claimed = repo.claim_for_publish(10, 120).unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Leased));

        // everything leased, nothing left to claim
        assert!(repo.claim_for_publish(10, 120).unwrap().is_empty());
        assert_eq!(repo.count_active().unwrap(), 2);
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let (_dir, repo) = repo();
        let j = job("d1", "/raw/d1.pdf");
        repo.enqueue(&j).unwrap();
        // zero-second lease expires immediately
        assert_eq!(repo.claim_for_publish(10, 0).unwrap().len(), 1);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let reclaimed = repo.claim_for_publish(10, 120).unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].job_id, j.job_id);
    }

    #[test]
    fn test_mark_unknown_job_reports_false() {
        let (_dir, repo) = repo();
        assert!(!repo.mark_completed("no-such-job", None).unwrap());
        assert!(!repo.mark_failed("no-such-job", "boom").unwrap());
    }

    #[test]
    fn test_counts_track_terminal_states() {
        let (_dir, repo) = repo();
        let a = job("d1", "/raw/d1.pdf");
        let b = job("d2", "/raw/d2.pdf");
        repo.enqueue(&a).unwrap();
        repo.enqueue(&b).unwrap();
        repo.mark_completed(&a.job_id, Some("/extracted/d1/tables")).unwrap();
        repo.mark_failed(&b.job_id, "worker_exception").unwrap();

        let counts = repo.counts().unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(repo.count_active().unwrap(), 0);
    }
}
