//! Run bookkeeping. Rows here are traceability only; no scheduling
//! decision ever reads them.

use std::path::PathBuf;

use crate::models::{Run, RunStatus};
use crate::repository::{connect, now_ts, parse_ts_opt, with_retry, RepositoryError, Result};

#[derive(Debug, Clone)]
pub struct RunRepository {
    db_path: PathBuf,
}

impl RunRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn init(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                 run_id      TEXT PRIMARY KEY,
                 started_at  TEXT NOT NULL,
                 finished_at TEXT,
                 status      TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    pub fn start_run(&self, run_id: &str) -> Result<()> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            conn.execute(
                "INSERT INTO runs (run_id, started_at, status) VALUES (?1, ?2, 'running')
                 ON CONFLICT(run_id) DO NOTHING",
                rusqlite::params![run_id, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            conn.execute(
                "UPDATE runs SET finished_at = ?2, status = ?3 WHERE run_id = ?1",
                rusqlite::params![run_id, now_ts(), status.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT run_id, started_at, finished_at, status FROM runs WHERE run_id = ?1",
        )?;
        let mut rows = stmt.query_map([run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (run_id, started_at, finished_at, status) = row?;
                let status = RunStatus::from_str(&status).ok_or_else(|| {
                    RepositoryError::Invalid(format!("unknown run status '{status}'"))
                })?;
                Ok(Some(Run {
                    run_id,
                    started_at: parse_ts_opt(started_at)
                        .unwrap_or(chrono::DateTime::UNIX_EPOCH),
                    finished_at: parse_ts_opt(finished_at),
                    status,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::new_run_id;
    use tempfile::TempDir;

    #[test]
    fn test_run_lifecycle() {
        let dir = TempDir::new().unwrap();
        let repo = RunRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();

        let run_id = new_run_id();
        repo.start_run(&run_id).unwrap();
        let run = repo.get(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        repo.finish_run(&run_id, RunStatus::Completed).unwrap();
        let run = repo.get(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }
}
