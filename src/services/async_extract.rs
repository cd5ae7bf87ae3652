//! Asynchronous table-extraction orchestration.
//!
//! Submission and collection are separate, independently re-runnable
//! passes. Submit records job intent idempotently, then leases and
//! publishes request messages; a publish that never happens is healed by
//! lease expiry. Collect drains the results queue, applies every store
//! write for a result, and only then acks the message, so a crash between
//! write and ack merely redelivers a result the store already absorbed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::{
    job_id_for, ExtractJob, ExtractRequestV1, ExtractResultV1, ExtractionRecord,
    ExtractionStatus, JobStatus, ResultStatus, EXTRACT_REQUEST_TYPE, MESSAGE_VERSION,
};
use crate::queue::{AsyncTableQueue, QueueKind};
use crate::repository::{DocumentRepository, JobRepository};

const PUBLISH_BATCH: usize = 50;
const COLLECT_BATCH: usize = 100;

/// Final counters for one submit pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitSummary {
    pub candidates: usize,
    /// Jobs newly queued or re-queued after a terminal state.
    pub enqueued: usize,
    /// Jobs left alone because they are already in flight.
    pub skipped_active: usize,
    pub published: usize,
}

/// Final counters for one collect pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectSummary {
    pub received: usize,
    pub completed: usize,
    pub failed: usize,
    /// Results referencing no known job; acked and dropped.
    pub unknown: usize,
    /// Payloads failing message validation; acked and dropped.
    pub malformed: usize,
}

/// Terminal state of one pipeline supervision loop.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOutcome {
    pub rounds: u32,
    pub collected: usize,
    /// True when every submitted job reached a terminal state.
    pub drained: bool,
    pub active_jobs: u64,
}

pub struct AsyncExtractService {
    docs: DocumentRepository,
    jobs: JobRepository,
    queue: Arc<dyn AsyncTableQueue>,
    run_id: String,
    lease_secs: u64,
}

impl AsyncExtractService {
    pub fn new(
        docs: DocumentRepository,
        jobs: JobRepository,
        queue: Arc<dyn AsyncTableQueue>,
        run_id: String,
        lease_secs: u64,
    ) -> Self {
        Self {
            docs,
            jobs,
            queue,
            run_id,
            lease_secs,
        }
    }

    /// Queue table-extraction jobs for documents that have a raw file and
    /// still need extraction, then publish the leased batch.
    pub async fn submit_jobs(
        &self,
        max_attempts: u32,
        force: bool,
        limit: usize,
    ) -> anyhow::Result<SubmitSummary> {
        let mut summary = SubmitSummary::default();

        let candidates = self.docs.list_pending_extracts(limit, max_attempts, force)?;
        summary.candidates = candidates.len();
        for doc in &candidates {
            let Some(raw_path) = doc.raw_location.as_deref() else {
                continue;
            };
            let job = ExtractJob {
                job_id: job_id_for(&doc.doc_id, raw_path),
                run_id: self.run_id.clone(),
                doc_id: doc.doc_id.clone(),
                raw_pdf_path: raw_path.to_string(),
                file_sha256: doc.sha256.clone(),
                attempt: 1,
                submitted_at: Utc::now(),
                status: JobStatus::Queued,
                lease_until: None,
                finished_at: None,
                error: None,
                result_ref: None,
            };
            if self.jobs.enqueue(&job)? {
                summary.enqueued += 1;
            } else {
                summary.skipped_active += 1;
                debug!(job_id = %job.job_id, doc_id = %doc.doc_id, "job already in flight");
            }
        }

        loop {
            let claimed = self.jobs.claim_for_publish(PUBLISH_BATCH, self.lease_secs)?;
            if claimed.is_empty() {
                break;
            }
            for job in &claimed {
                let request = request_for(job);
                match self
                    .queue
                    .publish(QueueKind::Requests, &request.to_value())
                    .await
                {
                    Ok(message_id) => {
                        summary.published += 1;
                        debug!(job_id = %job.job_id, %message_id, "published extract request");
                    }
                    Err(err) => {
                        // stays leased; the next submit pass re-claims it
                        // after the lease expires
                        warn!(job_id = %job.job_id, %err, "publish failed, leaving job leased");
                    }
                }
            }
        }

        info!(
            candidates = summary.candidates,
            enqueued = summary.enqueued,
            skipped_active = summary.skipped_active,
            published = summary.published,
            "submit pass finished"
        );
        Ok(summary)
    }

    /// Drain one batch of results from the queue.
    pub async fn collect_results(&self) -> anyhow::Result<CollectSummary> {
        let mut summary = CollectSummary::default();

        let envelopes = self.queue.consume(QueueKind::Results, COLLECT_BATCH).await?;
        for envelope in envelopes {
            summary.received += 1;
            let message_id = envelope.queue_message_id.clone();

            let result = match ExtractResultV1::from_value(&envelope.payload) {
                Ok(result) => result,
                Err(err) => {
                    summary.malformed += 1;
                    warn!(%message_id, %err, "discarding malformed result message");
                    self.queue.ack(QueueKind::Results, &[message_id]).await?;
                    continue;
                }
            };

            let Some(job) = self.jobs.get(&result.job_id)? else {
                summary.unknown += 1;
                warn!(
                    %message_id,
                    job_id = %result.job_id,
                    "result references unknown job, discarding"
                );
                self.queue.ack(QueueKind::Results, &[message_id]).await?;
                continue;
            };

            // Store writes happen before the ack: redelivery after a crash
            // just repeats idempotent updates.
            match result.status {
                ResultStatus::Ok | ResultStatus::NoTables => {
                    self.jobs
                        .mark_completed(&job.job_id, result.tables_location.as_deref())?;
                    self.docs.mark_extraction_result(&ExtractionRecord {
                        doc_id: job.doc_id.clone(),
                        status: ExtractionStatus::ExtractedOk,
                        attempt: job.attempt,
                        text_location: None,
                        tables_location: result.tables_location.clone(),
                        error: None,
                    })?;
                    summary.completed += 1;
                    debug!(
                        job_id = %job.job_id,
                        doc_id = %job.doc_id,
                        tables = result.tables_location.as_deref().unwrap_or("none"),
                        "job completed"
                    );
                }
                ResultStatus::Failed => {
                    let error = result
                        .error_summary()
                        .unwrap_or_else(|| "unknown".to_string());
                    self.jobs.mark_failed(&job.job_id, &error)?;
                    self.docs.mark_extraction_result(&ExtractionRecord {
                        doc_id: job.doc_id.clone(),
                        status: ExtractionStatus::ExtractedFailed,
                        attempt: job.attempt,
                        text_location: None,
                        tables_location: None,
                        error: Some(error.clone()),
                    })?;
                    summary.failed += 1;
                    warn!(job_id = %job.job_id, doc_id = %job.doc_id, error, "job failed");
                }
            }

            self.queue.ack(QueueKind::Results, &[message_id]).await?;
        }
        Ok(summary)
    }

    /// Poll for results until the job table drains or the loop goes idle.
    ///
    /// The idle cutoff is a liveness guard, not a safety property:
    /// un-acked results stay leased and undrained jobs stay claimable, so
    /// a later run picks up exactly where this one stopped.
    pub async fn run_pipeline(
        &self,
        poll_interval: Duration,
        idle_rounds: u32,
        max_rounds: u32,
    ) -> anyhow::Result<PipelineOutcome> {
        let mut rounds = 0u32;
        let mut idle = 0u32;
        let mut collected = 0usize;

        loop {
            rounds += 1;
            let summary = self.collect_results().await?;
            collected += summary.completed + summary.failed;

            if summary.received > 0 {
                idle = 0;
            } else {
                idle += 1;
            }

            let active = self.jobs.count_active()?;
            if active == 0 {
                info!(rounds, collected, "pipeline drained");
                return Ok(PipelineOutcome {
                    rounds,
                    collected,
                    drained: true,
                    active_jobs: 0,
                });
            }
            if idle >= idle_rounds || rounds >= max_rounds {
                warn!(
                    rounds,
                    collected,
                    active,
                    "pipeline stopping with jobs still in flight"
                );
                return Ok(PipelineOutcome {
                    rounds,
                    collected,
                    drained: false,
                    active_jobs: active,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn request_for(job: &ExtractJob) -> ExtractRequestV1 {
    ExtractRequestV1 {
        version: MESSAGE_VERSION.to_string(),
        message_type: EXTRACT_REQUEST_TYPE.to_string(),
        job_id: job.job_id.clone(),
        run_id: job.run_id.clone(),
        doc_id: job.doc_id.clone(),
        raw_pdf_path: job.raw_pdf_path.clone(),
        file_sha256: job.file_sha256.clone(),
        attempt: job.attempt,
        submitted_at: crate::repository::fmt_ts(job.submitted_at),
        options: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        doc_id_for_url, DiscoveredItem, DocStatus, DownloadRecord, DownloadStatus,
        ResultErrorCode, EXTRACT_RESULT_TYPE,
    };
    use crate::queue::SqliteQueue;
    use serde_json::json;

    struct Harness {
        _dir: tempfile::TempDir,
        docs: DocumentRepository,
        jobs: JobRepository,
        queue: Arc<SqliteQueue>,
        service: AsyncExtractService,
    }

    fn harness() -> Harness {
        let dir = tempfile::TempDir::new().unwrap();
        let docs = DocumentRepository::new(dir.path().join("docpipe.db"));
        docs.init().unwrap();
        let jobs = JobRepository::new(dir.path().join("docpipe.db"));
        jobs.init().unwrap();
        let queue = Arc::new(SqliteQueue::new(dir.path().join("async-queue.db"), 120));
        queue.init().unwrap();
        let service = AsyncExtractService::new(
            docs.clone(),
            jobs.clone(),
            queue.clone(),
            "run-test".to_string(),
            120,
        );
        Harness {
            _dir: dir,
            docs,
            jobs,
            queue,
            service,
        }
    }

    fn seed_downloaded(docs: &DocumentRepository, url: &str, raw: &str) -> String {
        let doc_id = doc_id_for_url(url);
        docs.upsert_discovered(
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
        docs.mark_download_result(&DownloadRecord {
            doc_id: doc_id.clone(),
            status: DownloadStatus::DownloadedOk,
            attempt: 1,
            sha256: Some("aa".to_string()),
            bytes: Some(4),
            content_type: None,
            raw_location: Some(raw.to_string()),
            etag: None,
            last_modified: None,
            error: None,
        })
        .unwrap();
        doc_id
    }

    fn result_payload(job_id: &str, doc_id: &str, status: &str) -> serde_json::Value {
        json!({
            "version": MESSAGE_VERSION,
            "type": EXTRACT_RESULT_TYPE,
            "jobId": job_id,
            "docId": doc_id,
            "status": status,
            "tablesLocation": if status == "ok" { json!("/extracted/tables") } else { json!(null) },
            "errorCode": if status == "failed" { json!("parse_error") } else { json!(null) },
            "error": if status == "failed" { json!("broken xref") } else { json!(null) },
            "finishedAt": "2026-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_submit_publishes_one_request_per_document() {
        let h = harness();
        let doc_id = seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");

        let summary = h.service.submit_jobs(3, false, 100).await.unwrap();
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.published, 1);

        let leased = h.queue.consume(QueueKind::Requests, 10).await.unwrap();
        assert_eq!(leased.len(), 1);
        let request = ExtractRequestV1::from_value(&leased[0].payload).unwrap();
        assert_eq!(request.doc_id, doc_id);
        assert_eq!(request.attempt, 1);

        // resubmitting while the job is in flight publishes nothing
        let second = h.service.submit_jobs(3, false, 100).await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.skipped_active, 1);
        assert_eq!(second.published, 0);
    }

    #[tokio::test]
    async fn test_collect_ok_completes_job_and_document() {
        let h = harness();
        let doc_id = seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");
        h.service.submit_jobs(3, false, 100).await.unwrap();
        let job_id = job_id_for(&doc_id, "/raw/a.pdf");

        h.queue
            .publish(
                QueueKind::Results,
                &result_payload(&job_id, &doc_id, "ok"),
            )
            .await
            .unwrap();

        let summary = h.service.collect_results().await.unwrap();
        assert_eq!(summary.completed, 1);

        let job = h.jobs.get(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_ref.as_deref(), Some("/extracted/tables"));

        let doc = h.docs.get(&doc_id).unwrap().unwrap();
        assert_eq!(doc.last_status, Some(DocStatus::ExtractedOk));
        assert_eq!(
            doc.extracted_tables_location.as_deref(),
            Some("/extracted/tables")
        );

        // results queue fully drained and acked
        assert!(h
            .queue
            .consume(QueueKind::Results, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_collect_failed_records_error_code() {
        let h = harness();
        let doc_id = seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");
        h.service.submit_jobs(3, false, 100).await.unwrap();
        let job_id = job_id_for(&doc_id, "/raw/a.pdf");

        h.queue
            .publish(
                QueueKind::Results,
                &result_payload(&job_id, &doc_id, "failed"),
            )
            .await
            .unwrap();

        let summary = h.service.collect_results().await.unwrap();
        assert_eq!(summary.failed, 1);

        let job = h.jobs.get(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let doc = h.docs.get(&doc_id).unwrap().unwrap();
        assert_eq!(doc.last_status, Some(DocStatus::ExtractedFailed));
        let error = doc.error.unwrap();
        assert!(error.contains(ResultErrorCode::ParseError.as_str()));
        assert!(error.contains("broken xref"));
        assert_eq!(doc.attempts_extract, 1);
    }

    #[tokio::test]
    async fn test_collect_discards_unknown_and_malformed() {
        let h = harness();
        h.queue
            .publish(
                QueueKind::Results,
                &result_payload("no-such-job", "d1", "ok"),
            )
            .await
            .unwrap();
        h.queue
            .publish(QueueKind::Results, &json!({"not": "a result"}))
            .await
            .unwrap();

        let summary = h.service.collect_results().await.unwrap();
        assert_eq!(summary.received, 2);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.malformed, 1);
        // both acked, queue empty
        assert!(h
            .queue
            .consume(QueueKind::Results, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_is_resubmittable_with_bumped_attempt() {
        let h = harness();
        let doc_id = seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");
        h.service.submit_jobs(3, false, 100).await.unwrap();
        let job_id = job_id_for(&doc_id, "/raw/a.pdf");

        h.queue
            .publish(
                QueueKind::Results,
                &result_payload(&job_id, &doc_id, "failed"),
            )
            .await
            .unwrap();
        h.service.collect_results().await.unwrap();

        // document is extracted_failed with attempts 1 < 3, so it is a
        // candidate again; the finished job re-queues with attempt 2
        let summary = h.service.submit_jobs(3, false, 100).await.unwrap();
        assert_eq!(summary.enqueued, 1);
        let job = h.jobs.get(&job_id).unwrap().unwrap();
        assert_eq!(job.attempt, 2);
        assert_eq!(job.status, JobStatus::Leased);
    }

    #[tokio::test]
    async fn test_pipeline_drains_when_jobs_finish() {
        let h = harness();
        let doc_id = seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");
        h.service.submit_jobs(3, false, 100).await.unwrap();
        let job_id = job_id_for(&doc_id, "/raw/a.pdf");
        h.queue
            .publish(
                QueueKind::Results,
                &result_payload(&job_id, &doc_id, "ok"),
            )
            .await
            .unwrap();

        let outcome = h
            .service
            .run_pipeline(Duration::from_millis(10), 5, 50)
            .await
            .unwrap();
        assert!(outcome.drained);
        assert_eq!(outcome.collected, 1);
        assert_eq!(outcome.active_jobs, 0);
    }

    #[tokio::test]
    async fn test_pipeline_gives_up_after_idle_rounds() {
        let h = harness();
        seed_downloaded(&h.docs, "https://x/a.pdf", "/raw/a.pdf");
        h.service.submit_jobs(3, false, 100).await.unwrap();

        // no worker ever answers
        let outcome = h
            .service
            .run_pipeline(Duration::from_millis(1), 3, 50)
            .await
            .unwrap();
        assert!(!outcome.drained);
        assert_eq!(outcome.active_jobs, 1);
        assert_eq!(outcome.rounds, 3);
    }
}
