//! Run bookkeeping and asynchronous extract job models.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Status of an orchestrated pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One row per orchestrated execution. Traceability only, never used for
/// work-claiming.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

/// Generate a globally unique run id: UTC timestamp plus a random suffix.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", stamp, &suffix[..8])
}

/// Status of an asynchronous extract job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "leased" => Some(JobStatus::Leased),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Compute the deterministic job id for a document and its raw file path.
/// Resubmitting the same work is a no-op because the id collides.
pub fn job_id_for(doc_id: &str, raw_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"|");
    hasher.update(raw_path.as_bytes());
    hex::encode(hasher.finalize())[..24].to_string()
}

/// One row per submitted asynchronous extraction request.
///
/// At most one active (queued or unexpired-leased) job exists per job id;
/// expired leases become re-claimable, which is how the pipeline recovers
/// from a worker crash mid-processing.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub job_id: String,
    pub run_id: String,
    pub doc_id: String,
    pub raw_pdf_path: String,
    pub file_sha256: Option<String>,
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    pub lease_until: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_deterministic() {
        let a = job_id_for("d1", "/r/d1.pdf");
        let b = job_id_for("d1", "/r/d1.pdf");
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert_ne!(a, job_id_for("d1", "/r/other.pdf"));
        assert_ne!(a, job_id_for("d2", "/r/d1.pdf"));
    }

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
